use collopt_ir::{ExecutionThreads, Module, verify_module};

use crate::{
    pass::{ModulePass, PassError},
    settings::PipelineSettings,
};

/// An ordered list of passes, run repeatedly until none of them changes the module.
pub struct PassPipeline {
    settings: PipelineSettings,
    passes: Vec<Box<dyn ModulePass>>,
}

impl PassPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            passes: Vec::new(),
        }
    }

    pub fn add_pass(&mut self, pass: impl ModulePass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run every pass in order, repeating the whole list until the module stops changing or
    /// `max_iterations` is reached. Returns whether any pass changed the module.
    pub fn run(&mut self, module: &mut Module, threads: &ExecutionThreads) -> Result<bool, PassError> {
        let mut changed = false;

        for iteration in 0..self.settings.max_iterations {
            let mut iteration_changed = false;

            for pass in &mut self.passes {
                if pass.run(module, threads)? {
                    log::debug!("pass {} changed module {}", pass.name(), module.name);
                    if self.settings.verify_after_each_pass {
                        verify_module(module)?;
                    }
                    iteration_changed = true;
                }
            }

            if !iteration_changed {
                log::debug!(
                    "pipeline converged on module {} after {} iteration(s)",
                    module.name,
                    iteration + 1
                );
                return Ok(changed);
            }

            changed = true;
            log::info!(
                "pipeline iteration {} changed module {}",
                iteration + 1,
                module.name
            );
        }

        log::debug!(
            "pipeline stopped after {} iteration(s) without converging",
            self.settings.max_iterations
        );
        Ok(changed)
    }
}
