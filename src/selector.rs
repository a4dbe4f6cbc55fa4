//! Integration with readiness selectors, such as an event loop built on `poll`.
//!
//! A selector watches a channel's [descriptor][std::os::fd::AsRawFd] for the `poll` events that [`translate_interest`] derives from an [`Interest`] set, and then asks [`UnixChannel::translate_ready_ops`] which operations are actually ready. While a selector holds a [`Registration`], closing the channel does not release the descriptor; the release happens when the last registration is dropped.

use crate::{
	channel::ChannelState,
	errors::ChannelError,
	Syscalls,
	UnixChannel,
};
use std::{
	ffi::c_short,
	fmt::{self, Display, Formatter},
};

/// A set of channel operations, as used for selector interest and readiness.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, derive_more::BitOr, derive_more::BitAnd)]
pub struct Interest(u8);

impl Interest {
	/// Reading.
	pub const READ: Self = Self(1 << 0);

	/// Writing.
	pub const WRITE: Self = Self(1 << 2);

	/// Completing a connection.
	pub const CONNECT: Self = Self(1 << 3);

	/// No operations.
	pub const fn empty() -> Self {
		Self(0)
	}

	/// The raw bits.
	pub const fn bits(self) -> u8 {
		self.0
	}

	/// Whether no operations are in this set.
	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	/// Whether every operation in `other` is in this set.
	pub const fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}
}

impl Display for Interest {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		let names: Vec<&str> =
			[(Self::READ, "READ"), (Self::WRITE, "WRITE"), (Self::CONNECT, "CONNECT")]
			.into_iter()
			.filter(|(op, _)| self.contains(*op))
			.map(|(_, name)| name)
			.collect();

		match names.is_empty() {
			true => write!(f, "(none)"),
			false => write!(f, "{}", names.join("|")),
		}
	}
}

/// The `poll` events to wait for, for the given interest. Connecting and writing both wait for `POLLOUT`.
pub fn translate_interest(interest: Interest) -> c_short {
	let mut events: c_short = 0;

	if interest.contains(Interest::READ) {
		events |= libc::POLLIN;
	}

	if interest.contains(Interest::WRITE) || interest.contains(Interest::CONNECT) {
		events |= libc::POLLOUT;
	}

	events
}

impl<S: Syscalls> UnixChannel<S> {
	/// Works out which operations in `interest` are ready, given the events that `poll` reported.
	///
	/// An invalid descriptor (`POLLNVAL`) makes nothing ready. An error or hang-up makes every operation of interest ready, so that the operation itself can report the problem. Otherwise, reading and writing are only ready on a connected channel, and connecting only on one that is not yet connected.
	pub fn translate_ready_ops(&self, revents: c_short, interest: Interest) -> Interest {
		if revents & libc::POLLNVAL != 0 {
			return Interest::empty();
		}

		if revents & (libc::POLLERR | libc::POLLHUP) != 0 {
			return interest;
		}

		let state = self.state();
		let connected = state == ChannelState::Connected;
		let unconnected = matches!(state, ChannelState::Unconnected | ChannelState::Connecting);

		let mut ready = Interest::empty();

		if revents & libc::POLLIN != 0 && interest.contains(Interest::READ) && connected {
			ready = ready | Interest::READ;
		}

		if revents & libc::POLLOUT != 0 && interest.contains(Interest::CONNECT) && unconnected {
			ready = ready | Interest::CONNECT;
		}

		if revents & libc::POLLOUT != 0 && interest.contains(Interest::WRITE) && connected {
			ready = ready | Interest::WRITE;
		}

		ready
	}

	/// Registers the channel with a selector.
	///
	/// As long as the returned guard exists, the channel's descriptor stays valid even if the channel is closed, and the channel cannot be switched back to blocking mode.
	///
	///
	/// # Errors
	///
	/// * [`ChannelError::Closed`] if the channel is closed.
	/// * [`ChannelError::IllegalBlockingMode`] if the channel is in blocking mode.
	pub fn register(&self) -> Result<Registration<'_, S>, ChannelError> {
		let mut state = self.lock_state();
		self.ensure_open()?;

		if self.is_blocking() {
			return Err(ChannelError::IllegalBlockingMode);
		}

		state.registrations += 1;

		Ok(Registration {
			channel: self,
			active: true,
		})
	}
}

/// A channel's registration with a selector. See [`UnixChannel::register`].
///
/// Dropping the registration deregisters the channel. If the channel was closed in the meantime and this was its last user, the descriptor is released then.
#[must_use = "dropping a registration deregisters the channel"]
pub struct Registration<'a, S: Syscalls = crate::PosixSyscalls> {
	channel: &'a UnixChannel<S>,
	active: bool,
}

impl<'a, S: Syscalls> Registration<'a, S> {
	/// The registered channel.
	pub fn channel(&self) -> &'a UnixChannel<S> {
		self.channel
	}

	/// Deregisters the channel.
	///
	///
	/// # Errors
	///
	/// [`ChannelError::Close`] if the channel was closed while registered, and releasing its descriptor now fails.
	pub fn deregister(mut self) -> Result<(), ChannelError> {
		self.release()
	}

	fn release(&mut self) -> Result<(), ChannelError> {
		if !self.active {
			return Ok(());
		}

		self.active = false;

		let mut state = self.channel.lock_state();
		state.registrations -= 1;

		if state.state == ChannelState::KillPending {
			return self.channel.kill_locked(&mut state);
		}

		Ok(())
	}
}

impl<S: Syscalls> Drop for Registration<'_, S> {
	fn drop(&mut self) {
		if let Err(error) = self.release() {
			tracing::warn!(fd = self.channel.raw_fd(), %error, "couldn't release channel on deregistration");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		testing::FakeSyscalls,
		UnixSocketAddr,
	};
	use assert_matches::assert_matches;

	fn non_blocking() -> (FakeSyscalls, UnixChannel<FakeSyscalls>) {
		let sys = FakeSyscalls::default();
		let channel = UnixChannel::with_syscalls(sys.clone(), socket2::Type::STREAM).unwrap();
		channel.configure_blocking(false).unwrap();
		(sys, channel)
	}

	#[test]
	fn interest_events() {
		assert_eq!(translate_interest(Interest::READ), libc::POLLIN);
		assert_eq!(translate_interest(Interest::CONNECT), libc::POLLOUT);
		assert_eq!(translate_interest(Interest::READ | Interest::WRITE), libc::POLLIN | libc::POLLOUT);
		assert_eq!(translate_interest(Interest::empty()), 0);
		assert_eq!((Interest::READ | Interest::CONNECT).to_string(), "READ|CONNECT");
	}

	#[test]
	fn ready_ops_follow_connection_state() {
		let (sys, channel) = non_blocking();
		let all = Interest::READ | Interest::WRITE | Interest::CONNECT;

		assert_eq!(channel.translate_ready_ops(libc::POLLOUT, all), Interest::CONNECT);
		assert_eq!(channel.translate_ready_ops(libc::POLLIN, all), Interest::empty());
		assert_eq!(channel.translate_ready_ops(libc::POLLNVAL | libc::POLLOUT, all), Interest::empty());
		assert_eq!(channel.translate_ready_ops(libc::POLLHUP, Interest::READ), Interest::READ);
		assert_eq!(channel.translate_ready_ops(libc::POLLERR, all), all);

		sys.push_connect(Ok(()));
		channel.connect(&UnixSocketAddr::new("/run/peer.sock")).unwrap();

		assert_eq!(channel.translate_ready_ops(libc::POLLOUT, all), Interest::WRITE);
		assert_eq!(channel.translate_ready_ops(libc::POLLIN | libc::POLLOUT, all), Interest::READ | Interest::WRITE);
		assert_eq!(channel.translate_ready_ops(libc::POLLIN, Interest::WRITE), Interest::empty());
	}

	#[test]
	fn registration_defers_release() {
		let (sys, channel) = non_blocking();

		let registration = channel.register().unwrap();
		assert_matches!(channel.configure_blocking(true), Err(ChannelError::IllegalBlockingMode));

		channel.close().unwrap();
		assert_eq!(channel.state(), ChannelState::KillPending);
		assert_eq!(sys.calls("close"), 0);

		registration.deregister().unwrap();
		assert_eq!(channel.state(), ChannelState::Killed);
		assert_eq!(sys.calls("close"), 1);
	}

	#[test]
	fn dropping_registration_deregisters() {
		let (sys, channel) = non_blocking();

		{
			let _first = channel.register().unwrap();
			let _second = channel.register().unwrap();
			channel.close().unwrap();
		}

		assert_eq!(channel.state(), ChannelState::Killed);
		assert_eq!(sys.calls("close"), 1);
		assert_matches!(channel.register().err(), Some(ChannelError::Closed));
	}

	#[test]
	fn blocking_channel_cannot_register() {
		let sys = FakeSyscalls::default();
		let channel = UnixChannel::with_syscalls(sys, socket2::Type::STREAM).unwrap();

		assert_matches!(channel.register().err(), Some(ChannelError::IllegalBlockingMode));
	}
}
