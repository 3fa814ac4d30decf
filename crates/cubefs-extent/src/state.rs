use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a writer or reader pipeline.
/// Transitions are one-way: `Live -> Recover -> {Error | Retired}`. A
/// pipeline that enters `Recover` stays there even after a recovery
/// target starts accepting packets -- the superseded pipeline itself
/// never goes back to `Live`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Live = 0,
    Recover = 1,
    Error = 2,
    Retired = 3,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::Live,
            1 => PipelineState::Recover,
            2 => PipelineState::Error,
            _ => PipelineState::Retired,
        }
    }
}

/// An atomic cell for [`PipelineState`]. Separate type so writer/reader
/// don't each hand-roll the load/store/ordering choice.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(initial: PipelineState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: PipelineState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
