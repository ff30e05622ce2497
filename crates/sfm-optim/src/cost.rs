//! Cost-function adapters handed to least-squares optimizers.
//!
//! [`AutoDiffCost`] wraps one observation of a [`ProjectionModel`] and exposes
//! it two ways:
//!
//! - through the object-safe [`CostFunction`] trait, which evaluates residuals
//!   and, on request, per-block Jacobians using forward-mode dual numbers;
//! - as a [`tiny_solver::factors::Factor`], so it can be added directly as a
//!   residual block of a `tiny_solver` problem.
//!
//! Parameter blocks are always ordered `[point, camera, image]`.

use crate::error::{DomainError, ProjectionError};
use crate::model::{ProjectionModel, POINT_DIM, RESIDUAL_DIM};
use log::trace;
use nalgebra::{DMatrix, DVector, DVectorView, RealField};
use num_dual::{jacobian, DualDVec64};
use std::marker::PhantomData;
use tiny_solver::factors::Factor;

/// Result of one cost-function evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub residuals: DVector<f64>,
    /// One `num_residuals x block_size` matrix per parameter block.
    pub jacobians: Option<Vec<DMatrix<f64>>>,
}

/// Residual with fixed dimension over fixed-size parameter blocks.
pub trait CostFunction: Send + Sync {
    fn num_residuals(&self) -> usize;
    fn parameter_block_sizes(&self) -> &[usize];

    /// Evaluates residuals (and Jacobians when `want_jacobians` is set).
    ///
    /// An `Err` marks the parameter set as invalid for this residual.
    fn evaluate(
        &self,
        params: &[&[f64]],
        want_jacobians: bool,
    ) -> Result<Evaluation, ProjectionError>;
}

/// Automatic-differentiation adapter for one observation.
#[derive(Debug, Clone)]
pub struct AutoDiffCost<M: ProjectionModel> {
    obs: [f64; 2],
    block_sizes: [usize; 3],
    _model: PhantomData<M>,
}

impl<M: ProjectionModel> AutoDiffCost<M> {
    pub fn new(obs: [f64; 2]) -> Self {
        Self {
            obs,
            block_sizes: [POINT_DIM, M::N_CAM_PARAMS, M::N_IMG_PARAMS],
            _model: PhantomData,
        }
    }

    pub fn observation(&self) -> [f64; 2] {
        self.obs
    }

    fn check_blocks(&self, params: &[&[f64]]) -> Result<(), ProjectionError> {
        if params.len() != self.block_sizes.len() {
            return Err(ProjectionError::BlockCount {
                expected: self.block_sizes.len(),
                got: params.len(),
            });
        }
        for (index, (block, expected)) in params.iter().zip(self.block_sizes).enumerate() {
            if block.len() != expected {
                return Err(ProjectionError::BlockSize {
                    index,
                    expected,
                    got: block.len(),
                });
            }
        }
        Ok(())
    }

    /// Residual over the concatenated `[point, camera, image]` vector.
    fn residual_stacked<T: RealField>(&self, x: &DVector<T>) -> Result<DVector<T>, DomainError> {
        let [np, nc, ni] = self.block_sizes;
        let r = M::residual(x.rows(0, np), x.rows(np, nc), x.rows(np + nc, ni), self.obs)?;
        Ok(DVector::from_row_slice(r.as_slice()))
    }
}

fn zero_residual<T: RealField>() -> DVector<T> {
    DVector::from_element(RESIDUAL_DIM, T::zero())
}

impl<M: ProjectionModel> CostFunction for AutoDiffCost<M> {
    fn num_residuals(&self) -> usize {
        RESIDUAL_DIM
    }

    fn parameter_block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }

    fn evaluate(
        &self,
        params: &[&[f64]],
        want_jacobians: bool,
    ) -> Result<Evaluation, ProjectionError> {
        self.check_blocks(params)?;

        if !want_jacobians {
            let [np, nc, ni] = self.block_sizes;
            let r = M::residual(
                DVectorView::from_slice(params[0], np),
                DVectorView::from_slice(params[1], nc),
                DVectorView::from_slice(params[2], ni),
                self.obs,
            )?;
            return Ok(Evaluation {
                residuals: DVector::from_row_slice(r.as_slice()),
                jacobians: None,
            });
        }

        let total: usize = self.block_sizes.iter().sum();
        let x0 = DVector::from_iterator(total, params.iter().flat_map(|b| b.iter().copied()));

        let mut failure = None;
        let (r, j) = jacobian(
            |x: DVector<DualDVec64>| {
                self.residual_stacked(&x).unwrap_or_else(|err| {
                    failure = Some(err);
                    zero_residual()
                })
            },
            x0,
        );
        if let Some(err) = failure {
            return Err(err.into());
        }

        let mut jacobians = Vec::with_capacity(self.block_sizes.len());
        let mut col = 0;
        for size in self.block_sizes {
            jacobians.push(j.columns(col, size).into_owned());
            col += size;
        }
        Ok(Evaluation {
            residuals: r,
            jacobians: Some(jacobians),
        })
    }
}

impl<M: ProjectionModel, T: RealField> Factor<T> for AutoDiffCost<M> {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(
            params.len(),
            3,
            "expected [point, camera, image] parameter blocks"
        );
        match M::residual(
            params[0].as_view(),
            params[1].as_view(),
            params[2].as_view(),
            self.obs,
        ) {
            Ok(r) => DVector::from_row_slice(r.as_slice()),
            Err(err) => {
                // NaN makes the solver reject the step that produced it.
                trace!("{}: residual rejected: {}", M::NAME, err);
                DVector::from_element(RESIDUAL_DIM, T::from_f64(f64::NAN).unwrap())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Radial4;

    const CAM: [f64; 9] = [640.0, 480.0, 900.0, 320.0, 240.0, -0.1, 0.02, 0.003, -0.001];

    fn pose() -> Vec<f64> {
        let mut img = vec![0.0; 22];
        img[..3].copy_from_slice(&[0.05, -0.1, 0.02]);
        img[3..6].copy_from_slice(&[0.1, 0.2, -1.0]);
        img
    }

    fn finite_difference(cost: &AutoDiffCost<Radial4>, blocks: &[Vec<f64>]) -> Vec<DMatrix<f64>> {
        let h = 1e-6;
        let mut out = Vec::new();
        for b in 0..blocks.len() {
            let mut jac = DMatrix::zeros(2, blocks[b].len());
            for k in 0..blocks[b].len() {
                let mut plus = blocks.to_vec();
                let mut minus = blocks.to_vec();
                plus[b][k] += h;
                minus[b][k] -= h;
                let p: Vec<&[f64]> = plus.iter().map(|v| v.as_slice()).collect();
                let m: Vec<&[f64]> = minus.iter().map(|v| v.as_slice()).collect();
                let rp = cost.evaluate(&p, false).unwrap().residuals;
                let rm = cost.evaluate(&m, false).unwrap().residuals;
                jac.set_column(k, &((rp - rm) / (2.0 * h)));
            }
            out.push(jac);
        }
        out
    }

    #[test]
    fn block_sizes_follow_the_model() {
        let cost = AutoDiffCost::<Radial4>::new([0.0, 0.0]);
        assert_eq!(cost.num_residuals(), 2);
        assert_eq!(cost.parameter_block_sizes(), &[3, 9, 22]);
    }

    #[test]
    fn dual_jacobians_match_finite_differences() {
        let cost = AutoDiffCost::<Radial4>::new([350.0, 200.0]);
        let blocks = vec![vec![0.3, -0.2, 4.0], CAM.to_vec(), pose()];
        let refs: Vec<&[f64]> = blocks.iter().map(|v| v.as_slice()).collect();

        let eval = cost.evaluate(&refs, true).unwrap();
        let plain = cost.evaluate(&refs, false).unwrap();
        assert!((eval.residuals.clone() - plain.residuals).norm() < 1e-9);

        let jacobians = eval.jacobians.unwrap();
        assert_eq!(jacobians.len(), 3);
        assert_eq!(jacobians[0].shape(), (2, 3));
        assert_eq!(jacobians[1].shape(), (2, 9));
        assert_eq!(jacobians[2].shape(), (2, 22));

        let numeric = finite_difference(&cost, &blocks);
        for (ad, fd) in jacobians.iter().zip(numeric.iter()) {
            let scale = 1.0 + fd.abs().max();
            assert!(
                (ad - fd).abs().max() / scale < 1e-5,
                "autodiff {ad} vs numeric {fd}"
            );
        }

        // Image size and redundant pose encodings do not affect the residual.
        assert_eq!(jacobians[1].column(0).abs().max(), 0.0);
        assert_eq!(jacobians[1].column(1).abs().max(), 0.0);
        assert_eq!(jacobians[2].columns(6, 16).abs().max(), 0.0);
    }

    #[test]
    fn jacobian_is_finite_at_identity_rotation() {
        let cost = AutoDiffCost::<Radial4>::new([320.0, 240.0]);
        let blocks = [vec![0.0, 0.0, 5.0], CAM.to_vec(), vec![0.0; 22]];
        let refs: Vec<&[f64]> = blocks.iter().map(|v| v.as_slice()).collect();
        let eval = cost.evaluate(&refs, true).unwrap();
        for j in eval.jacobians.unwrap() {
            assert!(j.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn domain_errors_propagate_from_both_paths() {
        let cost = AutoDiffCost::<Radial4>::new([0.0, 0.0]);
        let blocks = [vec![0.0, 0.0, -2.0], CAM.to_vec(), vec![0.0; 22]];
        let refs: Vec<&[f64]> = blocks.iter().map(|v| v.as_slice()).collect();
        for want_jacobians in [false, true] {
            assert_eq!(
                cost.evaluate(&refs, want_jacobians).unwrap_err(),
                ProjectionError::Domain(DomainError::BehindCamera)
            );
        }

        let params = [
            DVector::from_row_slice(&blocks[0]),
            DVector::from_row_slice(&blocks[1]),
            DVector::from_row_slice(&blocks[2]),
        ];
        let r: DVector<f64> = Factor::residual_func(&cost, &params);
        assert!(r.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn wrong_block_sizes_are_rejected() {
        let cost = AutoDiffCost::<Radial4>::new([0.0, 0.0]);
        let point = [0.0, 0.0, 1.0];
        let cam = [0.0; 8];
        let img = [0.0; 22];
        assert_eq!(
            cost.evaluate(&[&point, &cam, &img], false).unwrap_err(),
            ProjectionError::BlockSize {
                index: 1,
                expected: 9,
                got: 8
            }
        );
        assert_eq!(
            cost.evaluate(&[&point, &img], false).unwrap_err(),
            ProjectionError::BlockCount {
                expected: 3,
                got: 2
            }
        );
    }

    #[test]
    fn factor_path_matches_cost_function() {
        let cost = AutoDiffCost::<Radial4>::new([100.0, 80.0]);
        let blocks = [vec![0.5, 0.1, 3.0], CAM.to_vec(), pose()];
        let refs: Vec<&[f64]> = blocks.iter().map(|v| v.as_slice()).collect();
        let expected = cost.evaluate(&refs, false).unwrap().residuals;

        let params: Vec<DVector<f64>> = blocks.iter().map(|b| DVector::from_row_slice(b)).collect();
        let r: DVector<f64> = Factor::residual_func(&cost, &params);
        assert_eq!(r, expected);
    }
}
