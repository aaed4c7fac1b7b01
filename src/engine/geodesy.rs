//! Great-circle helpers shared by the router, the constraint evaluator and the
//! route extractor. Everything works on the sphere so that legs crossing the
//! antimeridian or running close to the poles are handled without special cases.

use std::f64::consts::PI;

use crate::engine::models::Coordinate;

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

type Vec3 = [f64; 3];

/// Wraps a bearing into `[0, 360)`.
pub fn normalize_bearing(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Wraps a longitude into `[-180, 180)`.
pub fn normalize_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Signed difference `to - from` in `(-180, 180]`.
pub fn angle_difference(from: f64, to: f64) -> f64 {
    let diff = normalize_bearing(to - from);
    if diff > 180.0 { diff - 360.0 } else { diff }
}

/// Initial great-circle bearing from `start` to `end`, in `[0, 360)`.
pub fn bearing(start: &Coordinate, end: &Coordinate) -> f64 {
    let start_lat = start.lat.to_radians();
    let end_lat = end.lat.to_radians();
    let d_lon = (end.lon - start.lon).to_radians();

    let y = d_lon.sin() * end_lat.cos();
    let x = start_lat.cos() * end_lat.sin() - start_lat.sin() * end_lat.cos() * d_lon.cos();
    normalize_bearing(y.atan2(x).to_degrees())
}

/// Haversine distance in metres.
pub fn distance(start: &Coordinate, end: &Coordinate) -> f64 {
    let start_lat = start.lat.to_radians();
    let end_lat = end.lat.to_radians();
    let d_lat = (end.lat - start.lat).to_radians();
    let d_lon = (end.lon - start.lon).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + start_lat.cos() * end_lat.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Point reached after travelling `distance_m` along `bearing_deg` from `start`.
pub fn destination(start: &Coordinate, distance_m: f64, bearing_deg: f64) -> Coordinate {
    let angular_dist = distance_m / EARTH_RADIUS_M;
    let bearing_rad = bearing_deg.to_radians();

    let start_lat = start.lat.to_radians();
    let start_lon = start.lon.to_radians();

    let end_lat = (start_lat.sin() * angular_dist.cos()
        + start_lat.cos() * angular_dist.sin() * bearing_rad.cos())
    .asin();

    let end_lon = start_lon
        + (bearing_rad.sin() * angular_dist.sin() * start_lat.cos())
            .atan2(angular_dist.cos() - start_lat.sin() * end_lat.sin());

    Coordinate {
        lat: end_lat.to_degrees(),
        lon: normalize_lon(end_lon.to_degrees()),
    }
}

/// Point a `fraction` of the way along the great circle from `a` to `b`.
pub fn interpolate(a: &Coordinate, b: &Coordinate, fraction: f64) -> Coordinate {
    let (va, vb) = (to_unit(a), to_unit(b));
    let omega = dot(&va, &vb).clamp(-1.0, 1.0).acos();
    if omega < 1e-12 {
        return *a;
    }
    let sin_omega = omega.sin();
    let wa = ((1.0 - fraction) * omega).sin() / sin_omega;
    let wb = (fraction * omega).sin() / sin_omega;
    from_unit(&[
        wa * va[0] + wb * vb[0],
        wa * va[1] + wb * vb[1],
        wa * va[2] + wb * vb[2],
    ])
}

/// Distance in metres from `p` to the great-circle segment `a`-`b`.
pub fn distance_to_segment(p: &Coordinate, a: &Coordinate, b: &Coordinate) -> f64 {
    let length = distance(a, b);
    if length < 1.0 {
        return distance(p, a);
    }
    let angular_ap = distance(a, p) / EARTH_RADIUS_M;
    let delta = (bearing(a, p) - bearing(a, b)).to_radians();
    if delta.cos() < 0.0 {
        return distance(p, a);
    }
    let cross_track = (angular_ap.sin() * delta.sin()).asin();
    let along_track =
        (angular_ap.cos() / cross_track.cos()).clamp(-1.0, 1.0).acos() * EARTH_RADIUS_M;
    if along_track > length {
        distance(p, b)
    } else {
        cross_track.abs() * EARTH_RADIUS_M
    }
}

/// True when the minor arcs `a1`-`a2` and `b1`-`b2` share a point.
pub fn arcs_intersect(a1: &Coordinate, a2: &Coordinate, b1: &Coordinate, b2: &Coordinate) -> bool {
    let (p1, p2) = (to_unit(a1), to_unit(a2));
    let (q1, q2) = (to_unit(b1), to_unit(b2));
    let n1 = cross(&p1, &p2);
    let n2 = cross(&q1, &q2);
    if norm(&n1) < 1e-15 || norm(&n2) < 1e-15 {
        return false;
    }
    let line = cross(&n1, &n2);
    let len = norm(&line);
    if len < 1e-15 {
        // Both arcs lie on the same great circle.
        return false;
    }
    let x = [line[0] / len, line[1] / len, line[2] / len];
    let neg = [-x[0], -x[1], -x[2]];
    [x, neg]
        .iter()
        .any(|c| within_arc(c, &p1, &p2, &n1) && within_arc(c, &q1, &q2, &n2))
}

/// Winding test of `p` against a ring given as edges on the sphere.
pub fn point_in_ring<I>(p: &Coordinate, edges: I) -> bool
where
    I: IntoIterator<Item = (Coordinate, Coordinate)>,
{
    let pv = to_unit(p);
    let mut winding = 0.0;
    for (a, b) in edges {
        let ta = cross(&pv, &to_unit(&a));
        let tb = cross(&pv, &to_unit(&b));
        let sin = dot(&cross(&ta, &tb), &pv);
        let cos = dot(&ta, &tb);
        winding += sin.atan2(cos);
    }
    winding.abs() > PI
}

fn within_arc(x: &Vec3, a: &Vec3, b: &Vec3, normal: &Vec3) -> bool {
    const EPS: f64 = 1e-14;
    dot(&cross(a, x), normal) >= -EPS && dot(&cross(x, b), normal) >= -EPS
}

fn to_unit(c: &Coordinate) -> Vec3 {
    let (lat, lon) = (c.lat.to_radians(), c.lon.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

fn from_unit(v: &Vec3) -> Coordinate {
    let len = norm(v);
    Coordinate {
        lat: (v[2] / len).clamp(-1.0, 1.0).asin().to_degrees(),
        lon: v[1].atan2(v[0]).to_degrees(),
    }
}

fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: &Vec3) -> f64 {
    dot(a, a).sqrt()
}
