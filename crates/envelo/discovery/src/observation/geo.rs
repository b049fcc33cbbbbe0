use envelo_boundary::{haversine_meters, GeoPoint};

use crate::ring::RingBuffer;

/// Positions observed for one geo parameter.
#[derive(Clone, Debug)]
pub struct GeoObservation {
    points: RingBuffer<GeoPoint>,
    count: u64,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

impl GeoObservation {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: RingBuffer::new(capacity),
            count: 0,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
        }
    }

    pub fn record(&mut self, point: GeoPoint) {
        if !point.is_valid() {
            return;
        }
        self.points.push(point);
        self.count += 1;
        self.min_lat = self.min_lat.min(point.lat);
        self.max_lat = self.max_lat.max(point.lat);
        self.min_lon = self.min_lon.min(point.lon);
        self.max_lon = self.max_lon.max(point.lon);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Retained points, oldest first.
    pub fn points(&self) -> Vec<GeoPoint> {
        self.points.to_vec()
    }

    /// South-west and north-east corners of everything recorded.
    pub fn bounds(&self) -> Option<(GeoPoint, GeoPoint)> {
        (self.count > 0).then(|| {
            (
                GeoPoint::new(self.min_lat, self.min_lon),
                GeoPoint::new(self.max_lat, self.max_lon),
            )
        })
    }

    /// Arithmetic mean of the retained points.
    pub fn centroid(&self) -> Option<GeoPoint> {
        let n = self.points.len();
        if n == 0 {
            return None;
        }
        let (lat, lon) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(lat, lon), p| (lat + p.lat, lon + p.lon));
        Some(GeoPoint::new(lat / n as f64, lon / n as f64))
    }

    /// Largest haversine distance from `center` to any retained point.
    pub fn max_radius_from(&self, center: &GeoPoint) -> f64 {
        self.points
            .iter()
            .map(|p| haversine_meters(center, p))
            .fold(0.0, f64::max)
    }

    pub fn convex_hull(&self) -> Vec<GeoPoint> {
        convex_hull(&self.points())
    }
}

/// `> 0` when `o -> a -> b` turns counter-clockwise (lon as x, lat as y).
fn cross(o: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> f64 {
    (a.lon - o.lon) * (b.lat - o.lat) - (a.lat - o.lat) * (b.lon - o.lon)
}

/// Graham scan in the lon/lat plane.
///
/// Returns the hull counter-clockwise starting from the lowest point.
/// Collinear boundary points and duplicates are dropped, so fewer than three
/// vertices come back for degenerate input.
pub fn convex_hull(points: &[GeoPoint]) -> Vec<GeoPoint> {
    let mut pts: Vec<GeoPoint> = points.to_vec();
    pts.sort_by(|a, b| a.lat.total_cmp(&b.lat).then(a.lon.total_cmp(&b.lon)));
    pts.dedup();
    let Some((&pivot, rest)) = pts.split_first() else {
        return Vec::new();
    };

    let mut rest = rest.to_vec();
    rest.sort_by(|a, b| {
        let angle_a = (a.lat - pivot.lat).atan2(a.lon - pivot.lon);
        let angle_b = (b.lat - pivot.lat).atan2(b.lon - pivot.lon);
        let dist_a = (a.lat - pivot.lat).powi(2) + (a.lon - pivot.lon).powi(2);
        let dist_b = (b.lat - pivot.lat).powi(2) + (b.lon - pivot.lon).powi(2);
        angle_a.total_cmp(&angle_b).then(dist_a.total_cmp(&dist_b))
    });

    let mut hull: Vec<GeoPoint> = vec![pivot];
    for p in rest {
        while hull.len() >= 2 && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], &p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn square_with_interior() -> Vec<GeoPoint> {
        let mut pts = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(1.0, 0.0),
        ];
        for i in 1..10 {
            for j in 1..10 {
                pts.push(GeoPoint::new(i as f64 / 10.0, j as f64 / 10.0));
            }
        }
        // Edge midpoints are collinear and must not become vertices.
        pts.push(GeoPoint::new(0.0, 0.5));
        pts.push(GeoPoint::new(0.5, 1.0));
        pts
    }

    #[test]
    fn hull_of_square_is_its_corners() {
        let hull = convex_hull(&square_with_interior());
        assert_eq!(hull.len(), 4);
        for corner in [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)] {
            assert!(hull.contains(&GeoPoint::new(corner.0, corner.1)));
        }
    }

    #[test]
    fn hull_is_counter_clockwise() {
        let hull = convex_hull(&square_with_interior());
        let n = hull.len();
        for i in 0..n {
            assert!(cross(&hull[i], &hull[(i + 1) % n], &hull[(i + 2) % n]) > 0.0);
        }
    }

    #[test]
    fn degenerate_inputs() {
        assert!(convex_hull(&[]).is_empty());
        let same = vec![GeoPoint::new(1.0, 1.0); 5];
        assert_eq!(convex_hull(&same).len(), 1);
        let line: Vec<_> = (0..5).map(|i| GeoPoint::new(i as f64, i as f64)).collect();
        assert_eq!(convex_hull(&line).len(), 2);
    }

    #[test]
    fn centroid_and_radius() {
        let mut obs = GeoObservation::new(16);
        obs.record(GeoPoint::new(0.0, -0.001));
        obs.record(GeoPoint::new(0.0, 0.001));
        obs.record(GeoPoint::new(91.0, 0.0));
        assert_eq!(obs.count(), 2);
        let c = obs.centroid().unwrap();
        assert!(c.lat.abs() < 1e-12 && c.lon.abs() < 1e-12);
        let r = obs.max_radius_from(&c);
        assert!((r - 111.19).abs() < 0.5, "radius {}", r);
        let (sw, ne) = obs.bounds().unwrap();
        assert_eq!(sw.lon, -0.001);
        assert_eq!(ne.lon, 0.001);
    }

    proptest! {
        #[test]
        fn every_point_inside_or_on_hull(
            coords in prop::collection::vec((-1.0f64..1.0, -1.0f64..1.0), 3..40)
        ) {
            let pts: Vec<GeoPoint> = coords.iter().map(|&(a, b)| GeoPoint::new(a, b)).collect();
            let hull = convex_hull(&pts);
            prop_assume!(hull.len() >= 3);
            let n = hull.len();
            for p in &pts {
                for i in 0..n {
                    prop_assert!(cross(&hull[i], &hull[(i + 1) % n], p) >= -1e-9);
                }
            }
        }
    }
}
