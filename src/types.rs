//! Core value types shared by the rollout and update phases.

/// A validity mask over the options of one discrete action head.
///
/// `true` marks a legal option.
pub type Mask = Vec<bool>;

/// One validity mask per factorized action head, in head order.
///
/// Unmasked action spaces use an empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionMasks(pub Vec<Mask>);

impl ActionMasks {
    /// No masks.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// A single mask.
    pub fn single(mask: Mask) -> Self {
        Self(vec![mask])
    }

    /// Returns the mask for head `i`, if present.
    pub fn get(&self, i: usize) -> Option<&Mask> {
        self.0.get(i)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Mask>> for ActionMasks {
    fn from(masks: Vec<Mask>) -> Self {
        Self(masks)
    }
}

/// A composite action: one value per action sub-component.
///
/// Discrete sub-actions are option indices, one per categorical head.
/// Continuous sub-actions are stored in physical units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Action {
    pub discrete: Vec<usize>,
    pub continuous: Vec<f64>,
}

impl Action {
    /// A single discrete choice.
    pub fn discrete(a: usize) -> Self {
        Self {
            discrete: vec![a],
            continuous: Vec::new(),
        }
    }

    /// Several independent discrete choices, e.g. `(source, path, destination)`.
    pub fn factorized(choices: Vec<usize>) -> Self {
        Self {
            discrete: choices,
            continuous: Vec::new(),
        }
    }

    /// A discrete path action paired with a continuous launch power.
    pub fn hybrid(path_action: usize, power: f64) -> Self {
        Self {
            discrete: vec![path_action],
            continuous: vec![power],
        }
    }

    /// First discrete component, if any.
    pub fn primary(&self) -> Option<usize> {
        self.discrete.first().copied()
    }
}
