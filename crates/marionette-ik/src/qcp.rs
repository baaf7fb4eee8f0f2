//! Weighted optimal superposition via the quaternion characteristic polynomial
//!
//! Given two equally sized point clouds and a non-negative weight per point,
//! [`QcpSolver`] computes the unit quaternion (and optionally the
//! translation) minimizing the weighted sum of squared distances between the
//! transformed `moved` cloud and the `target` cloud. The largest eigenvalue
//! of the 4x4 key matrix is found by Newton iteration on the quartic
//! characteristic polynomial; the optimal quaternion is recovered from the
//! adjoint of the shifted matrix. All accumulation runs in `f64`.

use glam::{DQuat, DVec3};

/// Default eigenvector degeneracy threshold
pub const DEFAULT_EVEC_PREC: f64 = 1e-6;

/// Default eigenvalue convergence threshold
pub const DEFAULT_EVAL_PREC: f64 = 1e-11;

/// Default Newton iteration bound
pub const DEFAULT_MAX_ITERATIONS: usize = 50;

/// Weighted rigid-superposition solver.
///
/// The solver carries no state between calls beyond the RMSD of the most
/// recent superposition, available through [`QcpSolver::rmsd`].
#[derive(Debug, Clone)]
pub struct QcpSolver {
    evec_prec: f64,
    eval_prec: f64,
    max_iterations: usize,
    rmsd: f64,
}

impl Default for QcpSolver {
    fn default() -> Self {
        Self::new(DEFAULT_EVEC_PREC, DEFAULT_EVAL_PREC)
    }
}

impl QcpSolver {
    /// Create a solver with explicit precision thresholds
    #[must_use]
    pub const fn new(evec_prec: f64, eval_prec: f64) -> Self {
        Self {
            evec_prec,
            eval_prec,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            rmsd: 0.0,
        }
    }

    /// Bound the Newton iteration count
    pub fn set_max_iterations(&mut self, max: usize) {
        self.max_iterations = max;
    }

    /// Weighted RMSD of the most recent superposition
    #[must_use]
    pub const fn rmsd(&self) -> f64 {
        self.rmsd
    }

    /// Compute the rotation (and translation when `translate` is set) that
    /// best superposes `moved` onto `target`.
    ///
    /// The three slices must have equal length. Degenerate input (empty
    /// clouds, zero total weight, collapsed geometry the eigenvector
    /// fallbacks cannot rescue) yields the identity rotation and a zero
    /// translation; the recorded RMSD still reports the residual.
    pub fn weighted_superpose(
        &mut self,
        moved: &[DVec3],
        target: &[DVec3],
        weights: &[f64],
        translate: bool,
    ) -> (DQuat, DVec3) {
        debug_assert_eq!(moved.len(), target.len());
        debug_assert_eq!(moved.len(), weights.len());

        let w_sum: f64 = weights.iter().sum();
        if moved.is_empty() || w_sum <= 0.0 {
            self.rmsd = 0.0;
            return (DQuat::IDENTITY, DVec3::ZERO);
        }

        let (moved_center, target_center) = if translate {
            (
                weighted_center(moved, weights, w_sum),
                weighted_center(target, weights, w_sum),
            )
        } else {
            (DVec3::ZERO, DVec3::ZERO)
        };
        let translation = target_center - moved_center;

        if moved.len() == 1 {
            let rotation =
                self.single_point_rotation(moved[0] - moved_center, target[0] - target_center);
            return (rotation, translation);
        }

        let rotation = self.superpose_many(
            moved,
            target,
            weights,
            w_sum,
            moved_center,
            target_center,
        );
        (rotation, translation)
    }

    /// Shortest-arc rotation between two single headings.
    ///
    /// The antiparallel case resolves to a half-turn about an arbitrary axis
    /// orthogonal to the moved heading, which is exactly what
    /// `from_rotation_arc` produces.
    fn single_point_rotation(&mut self, moved: DVec3, target: DVec3) -> DQuat {
        let norm_product = moved.length() * target.length();
        if norm_product <= f64::EPSILON {
            self.rmsd = (target - moved).length();
            return DQuat::IDENTITY;
        }
        let rotation = DQuat::from_rotation_arc(moved / moved.length(), target / target.length());
        self.rmsd = (rotation * moved - target).length();
        rotation
    }

    #[allow(clippy::similar_names)]
    fn superpose_many(
        &mut self,
        moved: &[DVec3],
        target: &[DVec3],
        weights: &[f64],
        w_sum: f64,
        moved_center: DVec3,
        target_center: DVec3,
    ) -> DQuat {
        // Inner products of the weighted moved cloud against the target
        // cloud, plus the trace scalar e0 = (g1 + g2) / 2. The moved cloud
        // is the weighted one so that the recovered eigenvector is the
        // active rotation carrying moved onto target.
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        let mut sxz = 0.0;
        let mut syx = 0.0;
        let mut syy = 0.0;
        let mut syz = 0.0;
        let mut szx = 0.0;
        let mut szy = 0.0;
        let mut szz = 0.0;
        let mut g1 = 0.0;
        let mut g2 = 0.0;

        for i in 0..moved.len() {
            let w = weights[i];
            let m = moved[i] - moved_center;
            let t = target[i] - target_center;

            let x1 = w * m.x;
            let y1 = w * m.y;
            let z1 = w * m.z;

            g1 += x1 * m.x + y1 * m.y + z1 * m.z;
            g2 += w * t.length_squared();

            sxx += x1 * t.x;
            sxy += x1 * t.y;
            sxz += x1 * t.z;

            syx += y1 * t.x;
            syy += y1 * t.y;
            syz += y1 * t.z;

            szx += z1 * t.x;
            szy += z1 * t.y;
            szz += z1 * t.z;
        }

        let e0 = (g1 + g2) * 0.5;

        let sxz_p_szx = sxz + szx;
        let syz_p_szy = syz + szy;
        let sxy_p_syx = sxy + syx;
        let syz_m_szy = syz - szy;
        let sxz_m_szx = sxz - szx;
        let sxy_m_syx = sxy - syx;
        let sxx_p_syy = sxx + syy;
        let sxx_m_syy = sxx - syy;

        let sxx2 = sxx * sxx;
        let syy2 = syy * syy;
        let szz2 = szz * szz;
        let sxy2 = sxy * sxy;
        let syz2 = syz * syz;
        let sxz2 = sxz * sxz;
        let syx2 = syx * syx;
        let szy2 = szy * szy;
        let szx2 = szx * szx;

        let syz_szy_m_syy_szz2 = 2.0 * (syz * szy - syy * szz);
        let sxx2_syy2_szz2_syz2_szy2 = syy2 + szz2 - sxx2 + syz2 + szy2;

        let c2 = -2.0 * (sxx2 + syy2 + szz2 + sxy2 + syx2 + sxz2 + szx2 + syz2 + szy2);
        let c1 = 8.0
            * (sxx * syz * szy + syy * szx * sxz + szz * sxy * syx
                - sxx * syy * szz
                - syz * szx * sxy
                - szy * syx * sxz);

        let sxy2_sxz2_syx2_szx2 = sxy2 + sxz2 - syx2 - szx2;

        let c0 = sxy2_sxz2_syx2_szx2 * sxy2_sxz2_syx2_szx2
            + (sxx2_syy2_szz2_syz2_szy2 + syz_szy_m_syy_szz2)
                * (sxx2_syy2_szz2_syz2_szy2 - syz_szy_m_syy_szz2)
            + (-sxz_p_szx * syz_m_szy + sxy_m_syx * (sxx_m_syy - szz))
                * (-sxz_m_szx * syz_p_szy + sxy_m_syx * (sxx_m_syy + szz))
            + (-sxz_p_szx * syz_p_szy - sxy_p_syx * (sxx_p_syy - szz))
                * (-sxz_m_szx * syz_m_szy - sxy_p_syx * (sxx_p_syy + szz))
            + (sxy_p_syx * syz_p_szy + sxz_p_szx * (sxx_m_syy + szz))
                * (-sxy_m_syx * syz_m_szy + sxz_p_szx * (sxx_p_syy + szz))
            + (sxy_p_syx * syz_m_szy + sxz_m_szx * (sxx_m_syy - szz))
                * (-sxy_m_syx * syz_p_szy + sxz_m_szx * (sxx_p_syy - szz));

        // Newton iteration on the quartic P(x) = x^4 + c2 x^2 + c1 x + c0,
        // seeded at the upper bound e0.
        let mut mx_eigen_v = e0;
        for _ in 0..self.max_iterations {
            let oldg = mx_eigen_v;
            let x2 = mx_eigen_v * mx_eigen_v;
            let b = (x2 + c2) * mx_eigen_v;
            let a = b + c1;
            let denom = 2.0 * x2 * mx_eigen_v + b + a;
            if denom.abs() <= f64::EPSILON {
                break;
            }
            let delta = (a * mx_eigen_v + c0) / denom;
            mx_eigen_v -= delta;
            if (mx_eigen_v - oldg).abs() < (self.eval_prec * mx_eigen_v).abs() {
                break;
            }
        }

        self.rmsd = (2.0 * (e0 - mx_eigen_v) / w_sum).max(0.0).sqrt();

        // Eigenvector recovery: any non-degenerate column of the adjoint of
        // (K - lambda I), with a fallback cascade through the columns.
        let a11 = sxx_p_syy + szz - mx_eigen_v;
        let a12 = syz_m_szy;
        let a13 = -sxz_m_szx;
        let a14 = sxy_m_syx;
        let a21 = syz_m_szy;
        let a22 = sxx_m_syy - szz - mx_eigen_v;
        let a23 = sxy_p_syx;
        let a24 = sxz_p_szx;
        let a31 = a13;
        let a32 = a23;
        let a33 = syy - sxx - szz - mx_eigen_v;
        let a34 = syz_p_szy;
        let a41 = a14;
        let a42 = a24;
        let a43 = a34;
        let a44 = szz - sxx_p_syy - mx_eigen_v;

        let a3344_4334 = a33 * a44 - a43 * a34;
        let a3244_4234 = a32 * a44 - a42 * a34;
        let a3243_4233 = a32 * a43 - a42 * a33;
        let a3143_4133 = a31 * a43 - a41 * a33;
        let a3144_4134 = a31 * a44 - a41 * a34;
        let a3142_4132 = a31 * a42 - a41 * a32;

        let mut q1 = a22 * a3344_4334 - a23 * a3244_4234 + a24 * a3243_4233;
        let mut q2 = -a21 * a3344_4334 + a23 * a3144_4134 - a24 * a3143_4133;
        let mut q3 = a21 * a3244_4234 - a22 * a3144_4134 + a24 * a3142_4132;
        let mut q4 = -a21 * a3243_4233 + a22 * a3143_4133 - a23 * a3142_4132;
        let mut qsqr = q1 * q1 + q2 * q2 + q3 * q3 + q4 * q4;

        if qsqr < self.evec_prec {
            q1 = a12 * a3344_4334 - a13 * a3244_4234 + a14 * a3243_4233;
            q2 = -a11 * a3344_4334 + a13 * a3144_4134 - a14 * a3143_4133;
            q3 = a11 * a3244_4234 - a12 * a3144_4134 + a14 * a3142_4132;
            q4 = -a11 * a3243_4233 + a12 * a3143_4133 - a13 * a3142_4132;
            qsqr = q1 * q1 + q2 * q2 + q3 * q3 + q4 * q4;

            if qsqr < self.evec_prec {
                let a1324_1423 = a13 * a24 - a14 * a23;
                let a1224_1422 = a12 * a24 - a14 * a22;
                let a1223_1322 = a12 * a23 - a13 * a22;
                let a1124_1421 = a11 * a24 - a14 * a21;
                let a1123_1321 = a11 * a23 - a13 * a21;
                let a1122_1221 = a11 * a22 - a12 * a21;

                q1 = a42 * a1324_1423 - a43 * a1224_1422 + a44 * a1223_1322;
                q2 = -a41 * a1324_1423 + a43 * a1124_1421 - a44 * a1123_1321;
                q3 = a41 * a1224_1422 - a42 * a1124_1421 + a44 * a1122_1221;
                q4 = -a41 * a1223_1322 + a42 * a1123_1321 - a43 * a1122_1221;
                qsqr = q1 * q1 + q2 * q2 + q3 * q3 + q4 * q4;

                if qsqr < self.evec_prec {
                    q1 = a32 * a1324_1423 - a33 * a1224_1422 + a34 * a1223_1322;
                    q2 = -a31 * a1324_1423 + a33 * a1124_1421 - a34 * a1123_1321;
                    q3 = a31 * a1224_1422 - a32 * a1124_1421 + a34 * a1122_1221;
                    q4 = -a31 * a1223_1322 + a32 * a1123_1321 - a33 * a1122_1221;
                    qsqr = q1 * q1 + q2 * q2 + q3 * q3 + q4 * q4;

                    if qsqr < self.evec_prec {
                        // Every column is degenerate: the clouds do not pin
                        // down a rotation. Report identity.
                        return DQuat::IDENTITY;
                    }
                }
            }
        }

        let norm = qsqr.sqrt();
        DQuat::from_xyzw(q2 / norm, q3 / norm, q4 / norm, q1 / norm).normalize()
    }
}

fn weighted_center(points: &[DVec3], weights: &[f64], w_sum: f64) -> DVec3 {
    let mut center = DVec3::ZERO;
    for (point, weight) in points.iter().zip(weights) {
        center += *point * *weight;
    }
    center / w_sum
}
