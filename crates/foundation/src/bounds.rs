/// Axis-aligned extent in projected (EPSG:3857) metres.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Extent {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Extent {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Extent {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// `x_min <= x_max` and `y_min <= y_max`, with no NaN edges.
    pub fn is_well_formed(&self) -> bool {
        self.x_min <= self.x_max && self.y_min <= self.y_max
    }

    pub fn contains(&self, other: &Extent) -> bool {
        self.x_min <= other.x_min
            && self.y_min <= other.y_min
            && self.x_max >= other.x_max
            && self.y_max >= other.y_max
    }
}

#[cfg(test)]
mod tests {
    use super::Extent;

    #[test]
    fn nan_edges_are_not_well_formed() {
        assert!(Extent::new(0.0, 0.0, 1.0, 1.0).is_well_formed());
        assert!(!Extent::new(2.0, 0.0, 1.0, 1.0).is_well_formed());
        assert!(!Extent::new(f64::NAN, 0.0, 1.0, 1.0).is_well_formed());
    }

    #[test]
    fn contains_is_inclusive() {
        let outer = Extent::new(-10.0, -10.0, 10.0, 10.0);
        assert!(outer.contains(&outer));
        assert!(outer.contains(&Extent::new(-1.0, -1.0, 1.0, 1.0)));
        assert!(!outer.contains(&Extent::new(-11.0, -1.0, 1.0, 1.0)));
        assert_eq!(outer.width(), 20.0);
        assert_eq!(outer.height(), 20.0);
    }
}
