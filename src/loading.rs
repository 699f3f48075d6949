/// Lifecycle of a `TextureStreamingController`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadState {
    NotReady,
    LoadingData,
    ReloadingShaders,
    ReloadingTextures,
    ReadyToRender,
}

/// Progress of a multi-step loading cycle
///
/// A negative `steps_to_do` means the cycle was begun out of order or failed; `steps_done` is
/// meaningless in that case.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LoadingProgress {
    pub steps_done: i32,
    pub steps_to_do: i32,
}

impl LoadingProgress {
    pub const FAILED: Self = Self {
        steps_done: 0,
        steps_to_do: -1,
    };

    pub fn is_failed(&self) -> bool {
        self.steps_to_do < 0
    }

    pub fn is_complete(&self) -> bool {
        self.steps_to_do >= 0 && self.steps_done == self.steps_to_do
    }
}

/// Whether a unit of loading work is only enumerated or actually performed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StepMode {
    /// Validate inputs and count the unit, compiling shader stages but creating nothing
    CountStepsOnly,
    Execute,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum CycleKind {
    Data,
    Shaders,
    Textures,
}

impl CycleKind {
    pub(crate) fn state(self) -> LoadState {
        match self {
            CycleKind::Data => LoadState::LoadingData,
            CycleKind::Shaders => LoadState::ReloadingShaders,
            CycleKind::Textures => LoadState::ReloadingTextures,
        }
    }
}

/// A begun loading cycle: the enumerated units and how many of them have run
pub(crate) struct Cycle<U> {
    pub kind: CycleKind,
    pub units: Vec<U>,
    pub done: usize,
    /// Set when a unit failed; the cycle then reports failure until replaced
    pub failed: bool,
}

impl<U> Cycle<U> {
    pub fn new(kind: CycleKind, units: Vec<U>) -> Self {
        Self {
            kind,
            units,
            done: 0,
            failed: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.failed && self.done == self.units.len()
    }

    /// Whether units remain to be run
    pub fn is_running(&self) -> bool {
        !self.failed && self.done < self.units.len()
    }

    pub fn progress(&self) -> LoadingProgress {
        LoadingProgress {
            steps_done: self.done as i32,
            steps_to_do: if self.failed {
                -1
            } else {
                self.units.len() as i32
            },
        }
    }
}
