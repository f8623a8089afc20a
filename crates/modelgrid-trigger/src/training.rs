//! External training-system seam.

use modelgrid_state::RetrainRequest;

/// Receives retrain requests. The hand-off is fire-and-forget: the
/// trigger does not drive the training run; completion arrives later
/// through `RetrainTrigger::on_training_complete`.
pub trait TrainingSystem: Send + Sync {
    fn dispatch(&self, request: &RetrainRequest) -> anyhow::Result<()>;
}

/// Training system that accepts every dispatch. Test/bootstrap use.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptDispatch;

impl TrainingSystem for AcceptDispatch {
    fn dispatch(&self, _request: &RetrainRequest) -> anyhow::Result<()> {
        Ok(())
    }
}
