pub mod heuristics;
pub mod navigator;

pub use heuristics::should_flat_wall_dodge;
pub use navigator::Navigator;

/// One maneuver decision per control cycle. Labels are stable strings used in
/// the telemetry log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    None,
    Brake,
    DodgeLeft,
    DodgeRight,
    BlindForward,
    Resume,
    Reinforce,
    Nudge,
    TimeoutRecover,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::None => "none",
            Decision::Brake => "brake",
            Decision::DodgeLeft => "dodge_left",
            Decision::DodgeRight => "dodge_right",
            Decision::BlindForward => "blind_forward",
            Decision::Resume => "resume",
            Decision::Reinforce => "resume_reinforce",
            Decision::Nudge => "nudge",
            Decision::TimeoutRecover => "timeout_nudge",
        }
    }

    /// True when the decision was a reaction to an obstacle in view.
    pub fn is_obstacle_response(&self) -> bool {
        matches!(
            self,
            Decision::Brake | Decision::DodgeLeft | Decision::DodgeRight
        )
    }

    fn is_dodge(&self) -> bool {
        matches!(self, Decision::DodgeLeft | Decision::DodgeRight)
    }
}

/// Decision plus the adaptive thresholds it was evaluated against, logged
/// alongside every cycle.
#[derive(Debug, Clone, Copy)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub brake_threshold: f64,
    pub dodge_threshold: f64,
}
