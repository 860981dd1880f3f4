//! Generation counter used to cancel stale loads.

/// Token captured when an async step starts.
///
/// A step holding a token that no longer matches the live [`Epoch`] must
/// discard its result instead of committing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpochToken(u64);

impl EpochToken {
  #[inline]
  pub fn value(self) -> u64 {
    self.0
  }
}

/// Monotonic world generation, advanced once per full reset.
#[derive(Debug, Default)]
pub struct Epoch {
  value: u64,
}

impl Epoch {
  /// Starts a new generation, invalidating every earlier token.
  pub fn advance(&mut self) -> EpochToken {
    self.value += 1;
    EpochToken(self.value)
  }

  #[inline]
  pub fn token(&self) -> EpochToken {
    EpochToken(self.value)
  }

  #[inline]
  pub fn is_current(&self, token: EpochToken) -> bool {
    token.0 == self.value
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn advancing_invalidates_older_tokens() {
    let mut epoch = Epoch::default();
    let first = epoch.advance();
    assert!(epoch.is_current(first));

    let second = epoch.advance();
    assert!(!epoch.is_current(first));
    assert!(epoch.is_current(second));
    assert!(first < second);
    assert_eq!(epoch.token(), second);
  }
}
