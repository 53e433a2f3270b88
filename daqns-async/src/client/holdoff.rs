use std::{cmp, ops::Range, time::Duration};

/// Reconnect hold-off: the first attempt after a reset waits the lower
/// bound, every further attempt doubles the wait up to the upper bound.
#[derive(Debug)]
pub(crate) struct HoldOff {
	min: Duration,
	max: Duration,
	cur: Option<Duration>,
}

impl HoldOff {
	pub fn new(bounds: Range<Duration>) -> Self {
		Self {
			min: bounds.start,
			max: bounds.end,
			cur: None,
		}
	}

	/// Reset the hold-off period to the lower bound.
	pub fn reset(&mut self) {
		self.cur = None;
	}

	/// Returns the next hold-off period.
	pub fn advance(&mut self) -> Duration {
		let next = match self.cur {
			None => self.min,
			Some(cur) => cmp::min(cur.saturating_mul(2), self.max),
		};
		self.cur = Some(next);
		next
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn doubles_up_to_the_cap() {
		let mut holdoff = HoldOff::new(Duration::from_millis(100)..Duration::from_millis(350));
		assert_eq!(holdoff.advance(), Duration::from_millis(100));
		assert_eq!(holdoff.advance(), Duration::from_millis(200));
		assert_eq!(holdoff.advance(), Duration::from_millis(350));
		assert_eq!(holdoff.advance(), Duration::from_millis(350));

		holdoff.reset();
		assert_eq!(holdoff.advance(), Duration::from_millis(100));
	}
}
