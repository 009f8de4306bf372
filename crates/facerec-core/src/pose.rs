//! Head pose from 2-D/3-D point correspondences (perspective-n-point).
//!
//! Camera intrinsics are approximated from the image size (focal length =
//! width, principal point = centre) with zero lens distortion. The pose is
//! refined with Levenberg–Marquardt on the six pose parameters, starting
//! from a frontal guess rotated to the observed in-plane angle.

use thiserror::Error;

const LM_MAX_ITERATIONS: usize = 100;
const LM_INITIAL_LAMBDA: f64 = 1e-3;
const LM_MAX_LAMBDA: f64 = 1e12;
const LM_MIN_IMPROVEMENT: f64 = 1e-12;
const JACOBIAN_STEP: f64 = 1e-6;
/// Residual assigned to a point projected behind the camera.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e6;
const MIN_CORRESPONDENCES: usize = 6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("need at least {MIN_CORRESPONDENCES} correspondences with matching counts, got {model} model and {image} image points")]
    BadInput { model: usize, image: usize },
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("pose solution is not finite")]
    NotFinite,
}

/// Pinhole camera with square pixels and no distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub focal: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Approximate intrinsics for an uncalibrated camera: focal length equals
    /// the image width, principal point at the (integer) image centre.
    pub fn from_image_size(width: u32, height: u32) -> Self {
        Self {
            focal: width as f64,
            cx: (width / 2) as f64,
            cy: (height / 2) as f64,
        }
    }

    /// Project a camera-frame point. `None` when the point is not in front of
    /// the camera.
    pub fn project(&self, p: [f64; 3]) -> Option<(f64, f64)> {
        if p[2] <= f64::EPSILON {
            return None;
        }
        Some((
            self.focal * p[0] / p[2] + self.cx,
            self.focal * p[1] / p[2] + self.cy,
        ))
    }
}

/// Camera-relative head pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    /// Axis-angle rotation, |r| <= pi.
    pub rotation: [f64; 3],
    pub translation: [f64; 3],
    /// RMS reprojection error in pixels.
    pub reprojection_rms: f64,
}

impl HeadPose {
    pub fn rotation_matrix(&self) -> [[f64; 3]; 3] {
        rodrigues(self.rotation)
    }

    /// In-plane rotation of the head about the camera's optical axis, in
    /// degrees within (-90, 90].
    ///
    /// Measured as the image-plane direction of the model's x axis. Face
    /// models are commonly defined with y up (or x mirrored) relative to image
    /// coordinates, so the half-turn ambiguity is folded away.
    pub fn roll_degrees(&self) -> f64 {
        let r = self.rotation_matrix();
        let mut roll = r[1][0].atan2(r[0][0]).to_degrees();
        if roll > 90.0 {
            roll -= 180.0;
        } else if roll <= -90.0 {
            roll += 180.0;
        }
        roll
    }

    /// Transform a model point into the camera frame.
    pub fn transform(&self, p: [f64; 3]) -> [f64; 3] {
        let r = self.rotation_matrix();
        let rotated = mat_vec(&r, p);
        [
            rotated[0] + self.translation[0],
            rotated[1] + self.translation[1],
            rotated[2] + self.translation[2],
        ]
    }
}

/// Solve for the pose mapping `model` points onto `image` points.
pub fn solve_pnp(
    model: &[[f64; 3]],
    image: &[(f64, f64)],
    camera: &CameraIntrinsics,
) -> Result<HeadPose, PoseError> {
    if model.len() != image.len() || model.len() < MIN_CORRESPONDENCES {
        return Err(PoseError::BadInput { model: model.len(), image: image.len() });
    }

    let mut best: Option<([f64; 6], f64)> = None;

    // Model conventions differ on whether y or x is flipped relative to the
    // image, so refine from both frontal orientations and keep the better fit.
    for base in [rot_x(std::f64::consts::PI), rot_z(std::f64::consts::PI)] {
        let Some(initial) = initial_guess(model, image, camera, &base) else {
            continue;
        };
        let Some((params, cost)) = levenberg_marquardt(model, image, camera, initial) else {
            continue;
        };
        if best.map_or(true, |(_, c)| cost < c) {
            best = Some((params, cost));
        }
    }

    let (params, cost) = best.ok_or(PoseError::Degenerate)?;
    if !params.iter().all(|v| v.is_finite()) || !cost.is_finite() {
        return Err(PoseError::NotFinite);
    }

    let pose = HeadPose {
        rotation: normalize_rotation([params[0], params[1], params[2]]),
        translation: [params[3], params[4], params[5]],
        reprojection_rms: (cost / model.len() as f64).sqrt(),
    };
    tracing::debug!(
        rotation = ?pose.rotation,
        translation = ?pose.translation,
        rms = pose.reprojection_rms,
        "solved head pose"
    );
    Ok(pose)
}

/// Frontal pose rotated in-plane so the widest model pair lines up with its
/// image counterpart; depth from the ratio of model to image spread.
fn initial_guess(
    model: &[[f64; 3]],
    image: &[(f64, f64)],
    camera: &CameraIntrinsics,
    base: &[[f64; 3]; 3],
) -> Option<[f64; 6]> {
    let (a, b) = widest_pair(model)?;

    let ma = mat_vec(base, model[a]);
    let mb = mat_vec(base, model[b]);
    let model_dx = mb[0] - ma[0];
    let model_dy = mb[1] - ma[1];
    let image_dx = image[b].0 - image[a].0;
    let image_dy = image[b].1 - image[a].1;

    let model_span = model_dx.hypot(model_dy);
    let image_span = image_dx.hypot(image_dy);
    if model_span < f64::EPSILON || image_span < f64::EPSILON {
        return None;
    }

    let angle = image_dy.atan2(image_dx) - model_dy.atan2(model_dx);
    let r0 = mat_mul(&rot_z(angle), base);
    let rvec = rotation_to_rodrigues(&r0);

    let tz = camera.focal * model_span / image_span;

    // Place the centroid of the model on the ray through the image centroid.
    let n = model.len() as f64;
    let mut centroid = [0.0; 3];
    let (mut u, mut v) = (0.0, 0.0);
    for (p, q) in model.iter().zip(image) {
        let rp = mat_vec(&r0, *p);
        for k in 0..3 {
            centroid[k] += rp[k] / n;
        }
        u += q.0 / n;
        v += q.1 / n;
    }
    let tx = (u - camera.cx) / camera.focal * tz - centroid[0];
    let ty = (v - camera.cy) / camera.focal * tz - centroid[1];

    Some([rvec[0], rvec[1], rvec[2], tx, ty, tz - centroid[2]])
}

/// Indices of the two model points furthest apart in the model's x/y plane.
fn widest_pair(model: &[[f64; 3]]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for i in 0..model.len() {
        for j in (i + 1)..model.len() {
            let d = (model[j][0] - model[i][0]).hypot(model[j][1] - model[i][1]);
            if best.map_or(true, |(_, _, bd)| d > bd) {
                best = Some((i, j, d));
            }
        }
    }
    best.map(|(i, j, _)| (i, j))
}

fn residuals(
    model: &[[f64; 3]],
    image: &[(f64, f64)],
    camera: &CameraIntrinsics,
    params: &[f64; 6],
) -> Vec<f64> {
    let r = rodrigues([params[0], params[1], params[2]]);
    let mut out = Vec::with_capacity(model.len() * 2);
    for (p, q) in model.iter().zip(image) {
        let rp = mat_vec(&r, *p);
        let pc = [rp[0] + params[3], rp[1] + params[4], rp[2] + params[5]];
        match camera.project(pc) {
            Some((u, v)) => {
                out.push(u - q.0);
                out.push(v - q.1);
            }
            None => {
                out.push(BEHIND_CAMERA_RESIDUAL);
                out.push(BEHIND_CAMERA_RESIDUAL);
            }
        }
    }
    out
}

fn sum_squares(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

/// Minimise the squared reprojection error. Returns the parameters and the
/// final sum of squared residuals.
fn levenberg_marquardt(
    model: &[[f64; 3]],
    image: &[(f64, f64)],
    camera: &CameraIntrinsics,
    mut params: [f64; 6],
) -> Option<([f64; 6], f64)> {
    let mut res = residuals(model, image, camera, &params);
    let mut cost = sum_squares(&res);
    let mut lambda = LM_INITIAL_LAMBDA;

    for iteration in 0..LM_MAX_ITERATIONS {
        let jac = numeric_jacobian(model, image, camera, &params);

        let mut jtj = [[0.0f64; 6]; 6];
        let mut jtr = [0.0f64; 6];
        for (row, r) in jac.iter().zip(&res) {
            for j in 0..6 {
                for k in 0..6 {
                    jtj[j][k] += row[j] * row[k];
                }
                jtr[j] += row[j] * r;
            }
        }

        let mut improved = false;
        while lambda < LM_MAX_LAMBDA {
            let mut damped = jtj;
            for (j, row) in damped.iter_mut().enumerate() {
                row[j] += lambda * jtj[j][j].max(1e-9);
            }
            let neg_jtr = jtr.map(|v| -v);

            let Some(step) = solve_linear(damped, neg_jtr) else {
                if iteration == 0 {
                    return None;
                }
                lambda *= 10.0;
                continue;
            };

            let mut candidate = params;
            for (c, s) in candidate.iter_mut().zip(step) {
                *c += s;
            }
            let cand_res = residuals(model, image, camera, &candidate);
            let cand_cost = sum_squares(&cand_res);

            if cand_cost.is_finite() && cand_cost < cost {
                let gain = cost - cand_cost;
                params = candidate;
                res = cand_res;
                cost = cand_cost;
                lambda = (lambda / 10.0).max(1e-12);
                improved = gain > LM_MIN_IMPROVEMENT * cost.max(1.0);
                break;
            }
            lambda *= 10.0;
        }

        if !improved {
            break;
        }
    }

    Some((params, cost))
}

fn numeric_jacobian(
    model: &[[f64; 3]],
    image: &[(f64, f64)],
    camera: &CameraIntrinsics,
    params: &[f64; 6],
) -> Vec<[f64; 6]> {
    let mut jac = vec![[0.0f64; 6]; model.len() * 2];
    for j in 0..6 {
        let h = JACOBIAN_STEP * params[j].abs().max(1.0);
        let mut plus = *params;
        let mut minus = *params;
        plus[j] += h;
        minus[j] -= h;
        let rp = residuals(model, image, camera, &plus);
        let rm = residuals(model, image, camera, &minus);
        for (i, row) in jac.iter_mut().enumerate() {
            row[j] = (rp[i] - rm[i]) / (2.0 * h);
        }
    }
    jac
}

/// Solve an N×N linear system via Gaussian elimination with partial pivoting.
/// Returns `None` for a (numerically) singular matrix.
#[allow(clippy::needless_range_loop)]
fn solve_linear<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    for col in 0..N {
        let mut max_row = col;
        let mut max_val = a[col][col].abs();
        for row in (col + 1)..N {
            if a[row][col].abs() > max_val {
                max_val = a[row][col].abs();
                max_row = row;
            }
        }
        a.swap(col, max_row);
        b.swap(col, max_row);

        let pivot = a[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for row in (col + 1)..N {
            let factor = a[row][col] / pivot;
            for j in col..N {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; N];
    for i in (0..N).rev() {
        x[i] = b[i];
        for j in (i + 1)..N {
            x[i] -= a[i][j] * x[j];
        }
        x[i] /= a[i][i];
    }
    Some(x)
}

/// Rotation matrix from an axis-angle vector.
pub fn rodrigues(r: [f64; 3]) -> [[f64; 3]; 3] {
    let theta = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
    if theta < 1e-12 {
        return [
            [1.0, -r[2], r[1]],
            [r[2], 1.0, -r[0]],
            [-r[1], r[0], 1.0],
        ];
    }
    let k = [r[0] / theta, r[1] / theta, r[2] / theta];
    let (s, c) = theta.sin_cos();
    let t = 1.0 - c;
    [
        [c + t * k[0] * k[0], t * k[0] * k[1] - s * k[2], t * k[0] * k[2] + s * k[1]],
        [t * k[1] * k[0] + s * k[2], c + t * k[1] * k[1], t * k[1] * k[2] - s * k[0]],
        [t * k[2] * k[0] - s * k[1], t * k[2] * k[1] + s * k[0], c + t * k[2] * k[2]],
    ]
}

/// Axis-angle vector from a rotation matrix.
pub fn rotation_to_rodrigues(m: &[[f64; 3]; 3]) -> [f64; 3] {
    let trace = m[0][0] + m[1][1] + m[2][2];
    let theta = ((trace - 1.0) / 2.0).clamp(-1.0, 1.0).acos();
    let sin = theta.sin();

    if theta < 1e-9 {
        return [0.0; 3];
    }
    if sin > 1e-6 {
        let scale = theta / (2.0 * sin);
        return [
            (m[2][1] - m[1][2]) * scale,
            (m[0][2] - m[2][0]) * scale,
            (m[1][0] - m[0][1]) * scale,
        ];
    }

    // theta ~ pi: recover the axis from the symmetric part.
    let diag = [m[0][0], m[1][1], m[2][2]];
    let i = (0..3)
        .max_by(|&a, &b| diag[a].total_cmp(&diag[b]))
        .unwrap_or(0);
    let mut k = [0.0f64; 3];
    k[i] = ((diag[i] + 1.0) / 2.0).max(0.0).sqrt();
    if k[i] < 1e-12 {
        return [0.0; 3];
    }
    for j in 0..3 {
        if j != i {
            k[j] = (m[i][j] + m[j][i]) / (4.0 * k[i]);
        }
    }
    let norm = (k[0] * k[0] + k[1] * k[1] + k[2] * k[2]).sqrt();
    [k[0] / norm * theta, k[1] / norm * theta, k[2] / norm * theta]
}

/// Wrap an axis-angle vector so its angle lies in [0, pi].
fn normalize_rotation(r: [f64; 3]) -> [f64; 3] {
    let theta = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
    if theta <= std::f64::consts::PI {
        return r;
    }
    let tau = std::f64::consts::TAU;
    let wrapped = theta.rem_euclid(tau);
    let scale = if wrapped > std::f64::consts::PI {
        (wrapped - tau) / theta
    } else {
        wrapped / theta
    };
    [r[0] * scale, r[1] * scale, r[2] * scale]
}

pub(crate) fn rot_x(a: f64) -> [[f64; 3]; 3] {
    let (s, c) = a.sin_cos();
    [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]]
}

pub(crate) fn rot_z(a: f64) -> [[f64; 3]; 3] {
    let (s, c) = a.sin_cos();
    [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
}

pub(crate) fn mat_mul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

pub(crate) fn mat_vec(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn rot_y(a: f64) -> [[f64; 3]; 3] {
        let (s, c) = a.sin_cos();
        [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]]
    }

    const MODEL: [[f64; 3]; 6] = [
        [0.0, 0.0, 0.0],
        [0.0, -330.0, -65.0],
        [-225.0, 170.0, -135.0],
        [225.0, 170.0, -135.0],
        [-150.0, -150.0, -125.0],
        [150.0, -150.0, -125.0],
    ];

    fn project_all(pose: &HeadPose, camera: &CameraIntrinsics) -> Vec<(f64, f64)> {
        MODEL
            .iter()
            .map(|p| camera.project(pose.transform(*p)).unwrap())
            .collect()
    }

    fn pose_from(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> HeadPose {
        HeadPose {
            rotation: rotation_to_rodrigues(&rotation),
            translation,
            reprojection_rms: 0.0,
        }
    }

    fn assert_rotation_close(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3], tol: f64) {
        for i in 0..3 {
            for j in 0..3 {
                assert!(
                    (a[i][j] - b[i][j]).abs() < tol,
                    "R[{i}][{j}]: {} vs {}",
                    a[i][j],
                    b[i][j]
                );
            }
        }
    }

    #[test]
    fn test_intrinsics_from_image_size() {
        let cam = CameraIntrinsics::from_image_size(641, 481);
        assert_eq!(cam.focal, 641.0);
        assert_eq!(cam.cx, 320.0);
        assert_eq!(cam.cy, 240.0);
    }

    #[test]
    fn test_rodrigues_roundtrip() {
        for r in [[0.1, -0.2, 0.3], [PI - 1e-3, 0.0, 0.0], [0.0, 0.0, 0.0], [0.5, 1.5, -0.7]] {
            let m = rodrigues(r);
            let back = rotation_to_rodrigues(&m);
            assert_rotation_close(&rodrigues(back), &m, 1e-6);
        }
    }

    #[test]
    fn test_rodrigues_half_turn() {
        let m = rot_x(PI);
        let r = rotation_to_rodrigues(&m);
        assert!((r[0].abs() - PI).abs() < 1e-6, "r = {r:?}");
        assert_rotation_close(&rodrigues(r), &m, 1e-6);
    }

    #[test]
    fn test_solve_linear() {
        let a = [[2.0, 1.0, -1.0], [-3.0, -1.0, 2.0], [-2.0, 1.0, 2.0]];
        let b = [8.0, -11.0, -3.0];
        let x = solve_linear(a, b).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-9);
        assert!((x[1] - 3.0).abs() < 1e-9);
        assert!((x[2] + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_solve_linear_singular() {
        let a = [[1.0, 2.0], [2.0, 4.0]];
        assert!(solve_linear(a, [1.0, 2.0]).is_none());
    }

    #[test]
    fn test_recovers_frontal_pose() {
        let cam = CameraIntrinsics::from_image_size(640, 480);
        let truth = pose_from(rot_x(PI), [20.0, -10.0, 2000.0]);
        let image = project_all(&truth, &cam);

        let pose = solve_pnp(&MODEL, &image, &cam).unwrap();
        assert!(pose.reprojection_rms < 1e-3, "rms = {}", pose.reprojection_rms);
        assert_rotation_close(&pose.rotation_matrix(), &truth.rotation_matrix(), 1e-4);
        assert!(pose.roll_degrees().abs() < 1e-3, "roll = {}", pose.roll_degrees());
    }

    #[test]
    fn test_recovers_rolled_and_turned_pose() {
        let cam = CameraIntrinsics::from_image_size(640, 480);
        let rotation = mat_mul(&rot_z(20f64.to_radians()), &mat_mul(&rot_y(0.2), &rot_x(PI)));
        let truth = pose_from(rotation, [-40.0, 30.0, 2500.0]);
        let image = project_all(&truth, &cam);

        let pose = solve_pnp(&MODEL, &image, &cam).unwrap();
        assert!(pose.reprojection_rms < 1e-3, "rms = {}", pose.reprojection_rms);
        assert_rotation_close(&pose.rotation_matrix(), &rotation, 1e-4);
        assert!((pose.roll_degrees() - truth.roll_degrees()).abs() < 1e-3);
    }

    #[test]
    fn test_roll_folds_mirrored_model() {
        // A model with x mirrored lands near a half turn about z; roll must
        // still report the in-plane tilt.
        let cam = CameraIntrinsics::from_image_size(640, 480);
        let rotation = mat_mul(&rot_z(PI + 15f64.to_radians()), &rot_x(0.05));
        let truth = pose_from(rotation, [0.0, 0.0, 2200.0]);
        let image = project_all(&truth, &cam);

        let pose = solve_pnp(&MODEL, &image, &cam).unwrap();
        assert!(pose.reprojection_rms < 1e-3, "rms = {}", pose.reprojection_rms);
        assert!((pose.roll_degrees() - 15.0).abs() < 1e-2, "roll = {}", pose.roll_degrees());
    }

    #[test]
    fn test_roll_degrees_range() {
        let pose = pose_from(mat_mul(&rot_z(10f64.to_radians()), &rot_x(PI)), [0.0, 0.0, 1.0]);
        assert!((pose.roll_degrees() - 10.0).abs() < 1e-9);

        let pose = pose_from(rot_z(PI - 10f64.to_radians()), [0.0, 0.0, 1.0]);
        assert!((pose.roll_degrees() + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotation_vector_normalized() {
        let r = normalize_rotation([1.5 * PI, 0.0, 0.0]);
        assert!((r[0] + 0.5 * PI).abs() < 1e-12);
        assert_rotation_close(&rodrigues(r), &rodrigues([1.5 * PI, 0.0, 0.0]), 1e-12);
    }

    #[test]
    fn test_bad_input() {
        let cam = CameraIntrinsics::from_image_size(640, 480);
        let err = solve_pnp(&MODEL[..5], &[(0.0, 0.0); 5], &cam).unwrap_err();
        assert_eq!(err, PoseError::BadInput { model: 5, image: 5 });
        let err = solve_pnp(&MODEL, &[(0.0, 0.0); 5], &cam).unwrap_err();
        assert_eq!(err, PoseError::BadInput { model: 6, image: 5 });
    }

    #[test]
    fn test_degenerate_image_points() {
        let cam = CameraIntrinsics::from_image_size(640, 480);
        let result = solve_pnp(&MODEL, &[(100.0, 100.0); 6], &cam);
        assert!(result.is_err());
    }
}
