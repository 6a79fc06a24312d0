//! Reference evaluator.
//!
//! Interprets a lowered kernel over host arrays. It is not a performance
//! target; it exists to check that a schedule computes the same values as the
//! unscheduled kernel.
//!
//! ```rust,ignore
//! let exe = polystage::build(&schedule)?;
//! let mut args = vec![
//!     HostArray::from_ints(ValueType::Int(32), &[10], &input)?,
//!     HostArray::new(ValueType::Int(32), &[10])?,
//! ];
//! exe.run(&mut args)?;
//! ```

pub mod array;
mod interp;

pub use array::HostArray;

use crate::codegen::{lower, LoweredKernel};
use crate::config::RuntimeConfig;
use crate::schedule::Schedule;
use crate::utils::errors::{ExecutionError, ExecutionErrorKind, StageResult};
use interp::Machine;
use log::debug;

/// A lowered kernel ready to be evaluated.
#[derive(Debug, Clone)]
pub struct Executable {
    kernel: LoweredKernel,
    config: RuntimeConfig,
}

/// Lower `schedule` and prepare it for evaluation.
pub fn build(schedule: &Schedule) -> StageResult<Executable> {
    let kernel = lower(schedule)?;
    interp::check_kernel(&kernel)?;
    Ok(Executable { kernel, config: schedule.config().runtime.clone() })
}

impl Executable {
    pub fn kernel(&self) -> &LoweredKernel {
        &self.kernel
    }

    /// Run the kernel. `args` holds one array per kernel argument: the
    /// placeholders in declaration order, then the returned tensors. Every
    /// argument is written back, so outputs are read from `args` afterwards.
    pub fn run(&self, args: &mut [HostArray]) -> StageResult<()> {
        let params: Vec<_> = self.kernel.args().collect();
        if params.len() != args.len() {
            return Err(mismatch(format!("kernel takes {} arguments, {} given", params.len(), args.len())));
        }

        let mut memory: Vec<Option<HostArray>> = vec![None; self.kernel.tensors.len()];
        for (param, arg) in params.iter().zip(args.iter()) {
            if arg.dtype() != &param.dtype || arg.shape() != param.shape.as_slice() {
                return Err(mismatch(format!(
                    "argument '{}' expects {:?} of {}, got {:?} of {}",
                    param.name,
                    param.shape,
                    param.dtype,
                    arg.shape(),
                    arg.dtype()
                )));
            }
            memory[param.id.0 as usize] = Some(arg.clone());
        }
        for local in self.kernel.locals() {
            memory[local.id.0 as usize] = Some(HostArray::new(local.dtype.clone(), &local.shape)?);
        }

        debug!("running kernel '{}'", self.kernel.name());
        let mut machine = Machine::new(&self.kernel, &self.config, memory);
        machine.run(self.kernel.body())?;
        let mut memory = machine.into_memory();

        for (param, arg) in params.iter().zip(args.iter_mut()) {
            if let Some(result) = memory[param.id.0 as usize].take() {
                *arg = result;
            }
        }
        Ok(())
    }
}

fn mismatch(message: String) -> crate::utils::errors::StageError {
    ExecutionError::new(ExecutionErrorKind::ArgumentMismatch, message).into()
}
