mod operation_step;
mod run_into;
mod step_into;
mod step_over;
