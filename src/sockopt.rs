//! The portable socket options, as a closed set of typed markers.
//!
//! Each supported option is a zero-sized type implementing [`SocketOption`], whose associated [`Value`][SocketOption::Value] is the type that [`UnixChannel::get_option`] returns for it. Options that can be changed also implement [`SettableOption`], which [`UnixChannel::set_option`] requires. Peer credentials are read-only, so attempting to set [`SoPeerCred`] does not compile.
//!
//! ```compile_fail
//! # fn example(channel: &unix_channel::UnixChannel, credentials: unix_channel::Credentials) {
//! channel.set_option(unix_channel::SoPeerCred, credentials);
//! # }
//! ```
//!
//! Values are checked before any system call is made. Buffer sizes, type-of-service, multicast time-to-live, and receive timeouts are rejected with [`ChannelError::InvalidArgument`] when out of range. The linger time, on the other hand, is clamped: negative values disable lingering and values above 65535 are lowered to 65535.

use crate::{
	errors::ChannelError,
	Credentials,
};
use std::{
	ffi::c_int,
	time::Duration,
};

#[cfg(doc)]
use crate::UnixChannel;

/// The name of a portable socket option.
///
/// Together with a [`Scope`], this is the key that the option registry translates into a `(level, option)` pair.
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum OptionName {
	/// Permission to send broadcast datagrams.
	#[display(fmt = "SO_BROADCAST")]
	Broadcast,

	/// Keep-alive messages on idle connections.
	#[display(fmt = "SO_KEEPALIVE")]
	KeepAlive,

	/// Linger on close while unsent data is present.
	#[display(fmt = "SO_LINGER")]
	Linger,

	/// Size of the send buffer.
	#[display(fmt = "SO_SNDBUF")]
	SendBufferSize,

	/// Size of the receive buffer.
	#[display(fmt = "SO_RCVBUF")]
	ReceiveBufferSize,

	/// Reuse of local addresses.
	#[display(fmt = "SO_REUSEADDR")]
	ReuseAddress,

	/// Disables Nagle's algorithm.
	#[display(fmt = "TCP_NODELAY")]
	NoDelay,

	/// IPv4 type-of-service.
	#[display(fmt = "IP_TOS")]
	IpTos,

	/// Outgoing interface for multicast datagrams.
	#[display(fmt = "IP_MULTICAST_IF")]
	MulticastInterface,

	/// Time-to-live (or hop limit) for multicast datagrams.
	#[display(fmt = "IP_MULTICAST_TTL")]
	MulticastTtl,

	/// Loop-back of outgoing multicast datagrams.
	#[display(fmt = "IP_MULTICAST_LOOP")]
	MulticastLoop,

	/// Credentials of the connected peer.
	#[display(fmt = "SO_PEERCRED")]
	PeerCredentials,

	/// Timeout for blocking receive calls.
	#[display(fmt = "SO_RCVTIMEO")]
	ReceiveTimeout,
}

/// The address family that a socket option is registered for.
///
/// `Unspecified` is its own scope, for options that apply regardless of address family; it does not match `Inet`, `Inet6`, or `Unix` entries, nor do they match it.
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Scope {
	/// Any address family.
	#[display(fmt = "unspecified")]
	Unspecified,

	/// IPv4.
	#[display(fmt = "inet")]
	Inet,

	/// IPv6.
	#[display(fmt = "inet6")]
	Inet6,

	/// Unix-domain.
	#[display(fmt = "unix")]
	Unix,
}

/// An option value in portable form, before it is encoded for the wire.
///
/// Booleans travel as `0` or `1`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OptionValue {
	/// An integer or boolean value.
	Int(c_int),

	/// Peer credentials.
	Credentials(Credentials),
}

/// An option value in the exact form that `getsockopt` and `setsockopt` exchange with the kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OptionPayload {
	/// A plain `int`.
	Int(c_int),

	/// A single byte, as used by `IP_MULTICAST_TTL` and `IP_MULTICAST_LOOP`.
	Byte(u8),

	/// A `struct linger`. `None` means lingering is disabled.
	Linger(Option<c_int>),

	/// A `struct timeval`.
	Timeval(Duration),

	/// A `struct ucred`.
	Credentials(Credentials),
}

/// Which form of [`OptionPayload`] a `getsockopt` call should read.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PayloadKind {
	/// [`OptionPayload::Int`].
	Int,

	/// [`OptionPayload::Byte`].
	Byte,

	/// [`OptionPayload::Linger`].
	Linger,

	/// [`OptionPayload::Timeval`].
	Timeval,

	/// [`OptionPayload::Credentials`].
	Credentials,
}

mod sealed {
	pub trait Sealed {}
}

/// A socket option that can be read. See the [module documentation][self].
pub trait SocketOption: sealed::Sealed + Copy {
	/// The type of the option's value.
	type Value;

	/// The option's portable name.
	const NAME: OptionName;

	/// The scope that a Unix-domain channel looks the option up in.
	const SCOPE: Scope;

	/// Converts the value read from the socket into the option's value type.
	fn decode(value: OptionValue) -> Self::Value;
}

/// A socket option that can be changed. See the [module documentation][self].
pub trait SettableOption: SocketOption {
	/// Checks the value and converts it to portable form.
	///
	/// # Errors
	///
	/// [`ChannelError::InvalidArgument`] if the value is out of range.
	fn encode(value: Self::Value) -> Result<OptionValue, ChannelError>;
}

fn decode_int(value: OptionValue) -> c_int {
	match value {
		OptionValue::Int(i) => i,
		OptionValue::Credentials(_) => 0,
	}
}

fn decode_bool(value: OptionValue) -> bool {
	decode_int(value) != 0
}

fn encode_bool(value: bool) -> OptionValue {
	OptionValue::Int(value.into())
}

fn check_range(
	option: OptionName,
	value: c_int,
	range: std::ops::RangeInclusive<c_int>,
	reason: &'static str,
) -> Result<c_int, ChannelError> {
	if range.contains(&value) {
		Ok(value)
	}
	else {
		Err(ChannelError::InvalidArgument {
			option,
			value: value.into(),
			reason,
		})
	}
}

/// Checks an integer option value against the range permitted for `option`, and clamps the linger time.
///
/// Options without a restricted range pass through unchanged.
pub(crate) fn normalize(option: OptionName, value: c_int) -> Result<c_int, ChannelError> {
	match option {
		OptionName::SendBufferSize => check_range(option, value, 0..=c_int::MAX, "send buffer size must not be negative"),
		OptionName::ReceiveBufferSize => check_range(option, value, 0..=c_int::MAX, "receive buffer size must not be negative"),
		OptionName::ReceiveTimeout => check_range(option, value, 0..=c_int::MAX, "receive timeout must not be negative"),
		OptionName::IpTos => check_range(option, value, 0..=255, "type-of-service must lie in 0..=255"),
		OptionName::MulticastTtl => check_range(option, value, 0..=255, "multicast time-to-live must lie in 0..=255"),
		OptionName::Linger => Ok(if value < 0 { -1 } else { value.min(65535) }),
		_ => Ok(value),
	}
}

fn encode_int(option: OptionName, value: c_int) -> Result<OptionValue, ChannelError> {
	normalize(option, value).map(OptionValue::Int)
}

macro_rules! option_marker {
	($(#[$meta:meta])* $marker:ident, $name:ident, $scope:ident, $value:ty, $decode:expr) => {
		$(#[$meta])*
		#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
		pub struct $marker;

		impl sealed::Sealed for $marker {}

		impl SocketOption for $marker {
			type Value = $value;
			const NAME: OptionName = OptionName::$name;
			const SCOPE: Scope = Scope::$scope;

			fn decode(value: OptionValue) -> Self::Value {
				$decode(value)
			}
		}
	};
}

option_marker!(
	/// `SO_SNDBUF`: the size of the socket send buffer, in bytes. Must not be negative. The operating system may adjust the value that is set.
	SoSndBuf, SendBufferSize, Unspecified, c_int, decode_int
);

impl SettableOption for SoSndBuf {
	fn encode(value: c_int) -> Result<OptionValue, ChannelError> {
		encode_int(Self::NAME, value)
	}
}

option_marker!(
	/// `SO_RCVBUF`: the size of the socket receive buffer, in bytes. Must not be negative. The operating system may adjust the value that is set.
	SoRcvBuf, ReceiveBufferSize, Unspecified, c_int, decode_int
);

impl SettableOption for SoRcvBuf {
	fn encode(value: c_int) -> Result<OptionValue, ChannelError> {
		encode_int(Self::NAME, value)
	}
}

option_marker!(
	/// `SO_KEEPALIVE`.
	SoKeepAlive, KeepAlive, Unspecified, bool, decode_bool
);

impl SettableOption for SoKeepAlive {
	fn encode(value: bool) -> Result<OptionValue, ChannelError> {
		Ok(encode_bool(value))
	}
}

option_marker!(
	/// `SO_LINGER`: seconds to linger on close, or `-1` if lingering is disabled.
	///
	/// Values below zero are stored as `-1`; values above 65535 are stored as 65535.
	SoLinger, Linger, Unspecified, c_int, decode_int
);

impl SettableOption for SoLinger {
	fn encode(value: c_int) -> Result<OptionValue, ChannelError> {
		encode_int(Self::NAME, value)
	}
}

option_marker!(
	/// `SO_REUSEADDR`.
	SoReuseAddr, ReuseAddress, Unspecified, bool, decode_bool
);

impl SettableOption for SoReuseAddr {
	fn encode(value: bool) -> Result<OptionValue, ChannelError> {
		Ok(encode_bool(value))
	}
}

option_marker!(
	/// `TCP_NODELAY`.
	TcpNoDelay, NoDelay, Unspecified, bool, decode_bool
);

impl SettableOption for TcpNoDelay {
	fn encode(value: bool) -> Result<OptionValue, ChannelError> {
		Ok(encode_bool(value))
	}
}

option_marker!(
	/// `SO_BROADCAST`.
	SoBroadcast, Broadcast, Unspecified, bool, decode_bool
);

impl SettableOption for SoBroadcast {
	fn encode(value: bool) -> Result<OptionValue, ChannelError> {
		Ok(encode_bool(value))
	}
}

option_marker!(
	/// `IP_TOS`: the IPv4 type-of-service octet. Must lie in `0..=255`.
	IpTos, IpTos, Inet, c_int, decode_int
);

impl SettableOption for IpTos {
	fn encode(value: c_int) -> Result<OptionValue, ChannelError> {
		encode_int(Self::NAME, value)
	}
}

option_marker!(
	/// `IP_MULTICAST_TTL` (or `IPV6_MULTICAST_HOPS` in the IPv6 scope). Must lie in `0..=255`.
	IpMulticastTtl, MulticastTtl, Inet, c_int, decode_int
);

impl SettableOption for IpMulticastTtl {
	fn encode(value: c_int) -> Result<OptionValue, ChannelError> {
		encode_int(Self::NAME, value)
	}
}

option_marker!(
	/// `IP_MULTICAST_LOOP` (or `IPV6_MULTICAST_LOOP` in the IPv6 scope).
	IpMulticastLoop, MulticastLoop, Inet, bool, decode_bool
);

impl SettableOption for IpMulticastLoop {
	fn encode(value: bool) -> Result<OptionValue, ChannelError> {
		Ok(encode_bool(value))
	}
}

option_marker!(
	/// `SO_RCVTIMEO`: timeout for blocking reads, in milliseconds. Zero means no timeout. Must not be negative.
	SoRcvTimeo, ReceiveTimeout, Unspecified, c_int, decode_int
);

impl SettableOption for SoRcvTimeo {
	fn encode(value: c_int) -> Result<OptionValue, ChannelError> {
		encode_int(Self::NAME, value)
	}
}

/// `SO_PEERCRED`: the credentials of the connected peer. Read-only.
///
/// # Availability
///
/// Linux and Android.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct SoPeerCred;

impl sealed::Sealed for SoPeerCred {}

impl SocketOption for SoPeerCred {
	type Value = Option<Credentials>;
	const NAME: OptionName = OptionName::PeerCredentials;
	const SCOPE: Scope = Scope::Unix;

	fn decode(value: OptionValue) -> Self::Value {
		match value {
			OptionValue::Credentials(credentials) => Some(credentials),
			OptionValue::Int(_) => None,
		}
	}
}

#[test]
fn test_linger_clamps() {
	assert_eq!(SoLinger::encode(-5).unwrap(), OptionValue::Int(-1));
	assert_eq!(SoLinger::encode(0).unwrap(), OptionValue::Int(0));
	assert_eq!(SoLinger::encode(30).unwrap(), OptionValue::Int(30));
	assert_eq!(SoLinger::encode(100_000).unwrap(), OptionValue::Int(65535));
}

#[test]
fn test_range_checks() {
	use assert_matches::assert_matches;

	assert_matches!(
		IpTos::encode(300),
		Err(ChannelError::InvalidArgument { option: OptionName::IpTos, value: 300, .. })
	);
	assert_eq!(IpTos::encode(200).unwrap(), OptionValue::Int(200));

	assert_matches!(IpMulticastTtl::encode(-1), Err(ChannelError::InvalidArgument { .. }));
	assert_matches!(IpMulticastTtl::encode(256), Err(ChannelError::InvalidArgument { .. }));
	assert_eq!(IpMulticastTtl::encode(255).unwrap(), OptionValue::Int(255));

	assert_matches!(SoRcvBuf::encode(-1), Err(ChannelError::InvalidArgument { .. }));
	assert_matches!(SoSndBuf::encode(-1), Err(ChannelError::InvalidArgument { .. }));
	assert_eq!(SoSndBuf::encode(0).unwrap(), OptionValue::Int(0));

	assert_matches!(SoRcvTimeo::encode(-10), Err(ChannelError::InvalidArgument { .. }));
}

#[test]
fn test_bool_encoding() {
	assert_eq!(SoKeepAlive::encode(true).unwrap(), OptionValue::Int(1));
	assert_eq!(SoKeepAlive::encode(false).unwrap(), OptionValue::Int(0));
	assert!(SoKeepAlive::decode(OptionValue::Int(8)));
	assert!(!SoKeepAlive::decode(OptionValue::Int(0)));
}
