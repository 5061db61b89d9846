//! Observation of the adaptive solver.
//!
//! The solver reports its progress as [`SolverEvent`]s to a [`SolverObserver`] passed in by the
//! caller. Memory accounting is optional and provided through a [`ResourceProbe`].
use crate::adaptive::Termination;
use log::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SolverEvent {
    IterationStarted {
        iteration: usize,
        active_indices: usize,
        dofs: usize,
    },
    PcgFinished {
        iteration: usize,
        num_iterations: usize,
        zeta: f64,
        converged: bool,
    },
    EstimateComputed {
        iteration: usize,
        xi: f64,
        res_part: f64,
        proj_part: f64,
        pcg_part: f64,
    },
    Marked {
        iteration: usize,
        residual_cells: usize,
        projection_cells: usize,
        new_multiindices: usize,
    },
    Refined {
        iteration: usize,
        dofs: usize,
        active_indices: usize,
    },
    Terminated {
        iteration: usize,
        termination: Termination,
    },
}

pub trait SolverObserver {
    fn notify(&mut self, event: &SolverEvent);
}

/// Forwards every event to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl SolverObserver for LogObserver {
    fn notify(&mut self, event: &SolverEvent) {
        match event {
            SolverEvent::IterationStarted {
                iteration,
                active_indices,
                dofs,
            } => info!(
                "refinement iteration {}: {} active multi-indices, {} dofs",
                iteration, active_indices, dofs
            ),
            SolverEvent::PcgFinished {
                iteration,
                num_iterations,
                zeta,
                converged,
            } => {
                if *converged {
                    info!("[{}] PCG converged in {} iterations, zeta = {:.4e}", iteration, num_iterations, zeta);
                } else {
                    warn!(
                        "[{}] PCG stopped after {} iterations without converging, zeta = {:.4e}",
                        iteration, num_iterations, zeta
                    );
                }
            }
            SolverEvent::EstimateComputed {
                iteration,
                xi,
                res_part,
                proj_part,
                pcg_part,
            } => info!(
                "[{}] xi = {:.4e} (res {:.4e}, proj {:.4e}, pcg {:.4e})",
                iteration, xi, res_part, proj_part, pcg_part
            ),
            SolverEvent::Marked {
                iteration,
                residual_cells,
                projection_cells,
                new_multiindices,
            } => debug!(
                "[{}] marked {} residual cells, {} projection cells, {} multi-indices",
                iteration, residual_cells, projection_cells, new_multiindices
            ),
            SolverEvent::Refined {
                iteration,
                dofs,
                active_indices,
            } => debug!(
                "[{}] refined to {} dofs on {} multi-indices",
                iteration, dofs, active_indices
            ),
            SolverEvent::Terminated { iteration, termination } => {
                info!("adaptive loop terminated after iteration {}: {:?}", iteration, termination)
            }
        }
    }
}

/// Collects all events, mainly for inspection in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    pub events: Vec<SolverEvent>,
}

impl SolverObserver for RecordingObserver {
    fn notify(&mut self, event: &SolverEvent) {
        self.events.push(event.clone());
    }
}

impl<O: SolverObserver + ?Sized> SolverObserver for &mut O {
    fn notify(&mut self, event: &SolverEvent) {
        (**self).notify(event)
    }
}

/// Reports resource usage of the process, e.g. resident memory in megabytes.
pub trait ResourceProbe {
    fn memory_usage(&self) -> Option<f64>;
}
