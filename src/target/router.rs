use super::device::TargetClient;
use super::kind::TargetKind;
use crate::input::TargetEvent;
use tracing::trace;

/// Picks the target for an event: the first declared kind accepting its class
#[derive(Debug, Clone, Default)]
pub struct TargetRouter {
    targets: Vec<TargetClient>,
}

impl TargetRouter {
    pub fn new(targets: Vec<TargetClient>) -> Self {
        Self { targets }
    }

    pub fn route(&self, event: &TargetEvent) -> Option<&TargetClient> {
        let class = event.capability.class();
        let target = self.targets.iter().find(|t| t.kind().accepts(class));
        if target.is_none() {
            trace!("No target accepts {} ({})", event.capability, class);
        }
        target
    }

    pub fn kinds(&self) -> Vec<TargetKind> {
        self.targets.iter().map(|t| t.kind()).collect()
    }

    pub fn targets(&self) -> &[TargetClient] {
        &self.targets
    }
}
