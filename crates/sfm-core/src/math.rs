use nalgebra::{Matrix3, Point2, Point3, RealField, Vector2, Vector3};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type Pt2 = Point2<Real>;
pub type Pt3 = Point3<Real>;
pub type Mat3 = Matrix3<Real>;

/// Squared rotation angle below which the first-order expansions are used.
const SMALL_ANGLE_SQ: f64 = f64::EPSILON;

/// Rotate `pt` by the angle-axis vector `aa` (generic for autodiff).
///
/// Uses Rodrigues' formula away from zero and `pt + aa x pt` near zero so the
/// derivative stays finite at the identity rotation.
pub fn angle_axis_rotate_point<T: RealField>(aa: &Vector3<T>, pt: &Vector3<T>) -> Vector3<T> {
    let theta2 = aa.dot(aa);
    if theta2.clone() > T::from_f64(SMALL_ANGLE_SQ).unwrap() {
        let theta = theta2.sqrt();
        let cos_theta = theta.clone().cos();
        let sin_theta = theta.clone().sin();
        let w = aa / theta;
        let w_cross_pt = w.cross(pt);
        let tmp = w.dot(pt) * (T::one() - cos_theta.clone());
        pt * cos_theta + w_cross_pt * sin_theta + w * tmp
    } else {
        pt + aa.cross(pt)
    }
}

/// Rotation matrix of an angle-axis vector.
pub fn angle_axis_to_rotation_matrix<T: RealField>(aa: &Vector3<T>) -> Matrix3<T> {
    let theta2 = aa.dot(aa);
    let skew = aa.cross_matrix();
    if theta2.clone() > T::from_f64(SMALL_ANGLE_SQ).unwrap() {
        let theta = theta2.clone().sqrt();
        let a = theta.clone().sin() / theta.clone();
        let b = (T::one() - theta.cos()) / theta2;
        Matrix3::identity() + skew.clone() * a + skew.clone() * skew * b
    } else {
        Matrix3::identity() + skew
    }
}

/// Unit quaternion `[w, x, y, z]` of an angle-axis vector.
pub fn angle_axis_to_quaternion<T: RealField>(aa: &Vector3<T>) -> [T; 4] {
    let theta2 = aa.dot(aa);
    let two = T::one() + T::one();
    if theta2.clone() > T::from_f64(SMALL_ANGLE_SQ).unwrap() {
        let theta = theta2.sqrt();
        let half = theta.clone() / two;
        let k = half.clone().sin() / theta;
        [
            half.cos(),
            aa.x.clone() * k.clone(),
            aa.y.clone() * k.clone(),
            aa.z.clone() * k,
        ]
    } else {
        [
            T::one(),
            aa.x.clone() / two.clone(),
            aa.y.clone() / two.clone(),
            aa.z.clone() / two,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Unit};

    #[test]
    fn rotate_point_matches_nalgebra() {
        let axis = Unit::new_normalize(Vec3::new(0.3, -0.5, 0.8));
        let angle = 0.7;
        let aa = axis.into_inner() * angle;
        let pt = Vec3::new(1.0, 2.0, 3.0);

        let expected = Rotation3::from_axis_angle(&axis, angle) * pt;
        let got = angle_axis_rotate_point(&aa, &pt);
        assert!((expected - got).norm() < 1e-12);

        let r = angle_axis_to_rotation_matrix(&aa);
        assert!((r * pt - expected).norm() < 1e-12);
    }

    #[test]
    fn zero_rotation_is_identity() {
        let pt = Vec3::new(-1.0, 0.5, 4.0);
        let got = angle_axis_rotate_point(&Vec3::zeros(), &pt);
        assert_eq!(got, pt);
        assert_eq!(angle_axis_to_rotation_matrix(&Vec3::zeros()), Mat3::identity());
        assert_eq!(angle_axis_to_quaternion(&Vec3::zeros()), [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn quaternion_matches_nalgebra() {
        let aa = Vec3::new(0.1, 0.2, -0.3);
        let q = nalgebra::UnitQuaternion::from_scaled_axis(aa);
        let [w, x, y, z] = angle_axis_to_quaternion(&aa);
        assert!((q.w - w).abs() < 1e-12);
        assert!((q.i - x).abs() < 1e-12);
        assert!((q.j - y).abs() < 1e-12);
        assert!((q.k - z).abs() < 1e-12);
    }
}
