use super::{DeathReason, Heart};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::any::type_name;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

/// Executable module
#[async_trait]
pub trait Module {
    /// Executed before running the core loop, usually to connect to the broker
    async fn pre_startup(&mut self) -> EmptyResult {
        Ok(())
    }

    /// Core run loop of the module
    ///
    /// When the function returns `Some(_)` the death of the returned [`Heart`] is awaited before calling the shutdown hook.
    /// Useful for situations where you spawn background tasks in the run loop but want to hand-off the program lifecycle management.
    ///
    /// Returning `None` results in the program entering a shutdown state and calling the `post_shutdown` hook.
    async fn run(&mut self) -> Result<Option<Heart>, BoxedError>;

    /// Shutdown hook executed after the core loop has terminated
    async fn post_shutdown(&mut self, termination_reason: &ModuleTerminationReason) {
        if termination_reason.is_success() {
            info!("Module exited normally")
        } else {
            error!(%termination_reason, "Module terminated with an error")
        }
    }
}

/// Reason why a module has terminated
#[derive(Error, Debug)]
pub enum ModuleTerminationReason {
    /// Startup routine threw an error
    #[error("startup routine threw an error")]
    StartupFailed(#[source] BoxedError),
    /// Core run loop threw an error
    #[error("error during operation")]
    OperationalError(#[source] BoxedError),
    /// [`Heart`] provided by module died
    #[error("heart provided by module died: {0}")]
    HeartDied(DeathReason),
    /// Run loop exited cleanly
    #[error("run loop exited cleanly")]
    ExitedNormally,
    /// Timeout during startup
    #[error("timeout during startup")]
    Timeout,
}

impl ModuleTerminationReason {
    /// Whether the module terminated without an error
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ModuleTerminationReason::HeartDied(_) | ModuleTerminationReason::ExitedNormally
        )
    }
}

/// Runner for [`Module`] implementations
pub struct ModuleRunner {
    startup_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Default for ModuleRunner {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl ModuleRunner {
    /// Creates a runner with custom startup and shutdown timeouts
    pub fn new(startup_timeout: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            startup_timeout,
            shutdown_timeout,
        }
    }

    /// Executes a [`Module`] until it exits by calling the corresponding lifecycle functions in order
    /// and returns the reason why it terminated.
    #[instrument(skip(self, module), fields(module_name = type_name::<M>()))]
    pub async fn run<M: Module + Send + Sync>(&self, mut module: M) -> ModuleTerminationReason {
        info!("Commencing module startup sequence");
        let startup = timeout(self.startup_timeout, module.pre_startup()).await;

        let termination_reason = match startup {
            Ok(Ok(_)) => self.run_loop(&mut module).await,
            Ok(Err(error)) => {
                error!(?error, "Module startup sequence encountered an error");
                ModuleTerminationReason::StartupFailed(error)
            }
            Err(_) => {
                error!("Module startup sequence timed out");
                ModuleTerminationReason::Timeout
            }
        };

        info!("Commencing module shutdown sequence");
        let result = timeout(
            self.shutdown_timeout,
            module.post_shutdown(&termination_reason),
        )
        .await;

        if result.is_err() {
            error!("Module shutdown sequence timed out");
        }

        termination_reason
    }

    async fn run_loop<M: Module + Send + Sync>(&self, module: &mut M) -> ModuleTerminationReason {
        info!("Executing module run procedure");
        match module.run().await {
            Ok(None) => {
                debug!("Module run procedure completed successfully");
                ModuleTerminationReason::ExitedNormally
            }
            Ok(Some(mut heart)) => {
                debug!("Module run procedure completed successfully, entering run loop");
                let death_reason = heart.death().await;
                info!(%death_reason, "Heart provided by run procedure died");
                ModuleTerminationReason::HeartDied(death_reason)
            }
            Err(error) => {
                info!(?error, "Module run procedure encountered an error");
                ModuleTerminationReason::OperationalError(error)
            }
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Scripted {
        fail_startup: bool,
        fail_run: bool,
        stall_startup: bool,
        kill_after_run: bool,
        shut_down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Module for Scripted {
        async fn pre_startup(&mut self) -> EmptyResult {
            if self.stall_startup {
                futures::future::pending::<()>().await;
            }

            if self.fail_startup {
                Err("no broker".into())
            } else {
                Ok(())
            }
        }

        async fn run(&mut self) -> Result<Option<Heart>, BoxedError> {
            if self.fail_run {
                return Err("broken".into());
            }

            if self.kill_after_run {
                let (heart, stone) = Heart::new();
                tokio::spawn(async move { stone.kill("done").await });
                return Ok(Some(heart));
            }

            Ok(None)
        }

        async fn post_shutdown(&mut self, _termination_reason: &ModuleTerminationReason) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn exit_normally() {
        let shut_down = Arc::new(AtomicBool::new(false));
        let module = Scripted {
            shut_down: shut_down.clone(),
            ..Default::default()
        };

        let reason = ModuleRunner::default().run(module).await;

        assert!(matches!(reason, ModuleTerminationReason::ExitedNormally));
        assert!(shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn wait_for_the_heart_returned_by_run() {
        let module = Scripted {
            kill_after_run: true,
            ..Default::default()
        };

        match ModuleRunner::default().run(module).await {
            ModuleTerminationReason::HeartDied(reason) => {
                assert_eq!(reason, DeathReason::Killed("done".into()))
            }
            other => panic!("unexpected termination {:?}", other),
        }
    }

    #[tokio::test]
    async fn report_failures_and_still_shut_down() {
        let shut_down = Arc::new(AtomicBool::new(false));
        let module = Scripted {
            fail_startup: true,
            shut_down: shut_down.clone(),
            ..Default::default()
        };

        let reason = ModuleRunner::default().run(module).await;

        assert!(matches!(reason, ModuleTerminationReason::StartupFailed(_)));
        assert!(!reason.is_success());
        assert!(shut_down.load(Ordering::SeqCst));

        let module = Scripted {
            fail_run: true,
            ..Default::default()
        };
        let reason = ModuleRunner::default().run(module).await;
        assert!(matches!(reason, ModuleTerminationReason::OperationalError(_)));
    }

    #[tokio::test]
    async fn time_out_stalled_startups() {
        let module = Scripted {
            stall_startup: true,
            ..Default::default()
        };
        let runner = ModuleRunner::new(Duration::from_millis(20), Duration::from_millis(20));

        assert!(matches!(
            runner.run(module).await,
            ModuleTerminationReason::Timeout
        ));
    }
}
