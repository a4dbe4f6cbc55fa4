//! Getting and setting socket options by portable name.

use crate::{
	errors::ChannelError,
	registry::{self, OptionDescriptor},
	sockopt,
	OptionName,
	OptionPayload,
	OptionValue,
	PayloadKind,
	Scope,
	Syscalls,
};
use std::{
	ffi::c_int,
	os::fd::RawFd,
	time::Duration,
};

/// Converts a portable value into the wire form that `descriptor` expects.
///
/// The value is checked against the option's permitted range first, and a linger time is clamped, exactly as the typed [`SettableOption`][crate::SettableOption] markers do.
///
///
/// # Errors
///
/// [`ChannelError::InvalidArgument`] if the value is out of range, or [`ChannelError::UnsupportedOption`] if the option cannot be set.
pub fn encode_payload(
	option: OptionName,
	descriptor: &OptionDescriptor,
	value: OptionValue,
) -> Result<OptionPayload, ChannelError> {
	let int = match value {
		OptionValue::Int(int) => sockopt::normalize(option, int)?,
		OptionValue::Credentials(_) => return Err(ChannelError::UnsupportedOption { option }),
	};

	Ok(match descriptor.payload_kind() {
		PayloadKind::Int => OptionPayload::Int(int),

		PayloadKind::Byte => OptionPayload::Byte(
			u8::try_from(int)
			.map_err(|_| ChannelError::InvalidArgument {
				option,
				value: int.into(),
				reason: "value must lie in 0..=255",
			})?
		),

		PayloadKind::Linger => OptionPayload::Linger((int >= 0).then_some(int)),

		PayloadKind::Timeval => OptionPayload::Timeval(
			Duration::from_millis(
				u64::try_from(int)
				.map_err(|_| ChannelError::InvalidArgument {
					option,
					value: int.into(),
					reason: "timeout must not be negative",
				})?
			)
		),

		PayloadKind::Credentials => return Err(ChannelError::UnsupportedOption { option }),
	})
}

/// Converts a value read from the socket back into portable form.
///
/// A disabled linger reads as `-1`. Timeouts are reported in whole milliseconds.
pub fn decode_payload(payload: OptionPayload) -> OptionValue {
	match payload {
		OptionPayload::Int(int) => OptionValue::Int(int),
		OptionPayload::Byte(byte) => OptionValue::Int(byte.into()),
		OptionPayload::Linger(seconds) => OptionValue::Int(seconds.unwrap_or(-1)),
		OptionPayload::Timeval(timeout) => OptionValue::Int(
			c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX)
		),
		OptionPayload::Credentials(credentials) => OptionValue::Credentials(credentials),
	}
}

/// Reads an option from a socket.
///
///
/// # Errors
///
/// [`ChannelError::UnsupportedOption`] if the option has no entry for `scope`, or [`ChannelError::Socket`] if `getsockopt` fails.
pub fn get_socket_option<S>(
	sys: &S,
	fd: RawFd,
	scope: Scope,
	option: OptionName,
) -> Result<OptionValue, ChannelError>
where
	S: Syscalls + ?Sized,
{
	let descriptor = registry::resolve(option, scope)?;

	let payload =
		sys.getsockopt(fd, descriptor.level, descriptor.name, descriptor.payload_kind())
		.map_err(ChannelError::from)?;

	Ok(decode_payload(payload))
}

/// Writes an option to a socket.
///
/// The value is validated as with [`encode_payload`] before any system call is made.
///
///
/// # Errors
///
/// * [`ChannelError::UnsupportedOption`] if the option has no entry for `scope`.
/// * [`ChannelError::InvalidArgument`] if the value is out of range.
/// * [`ChannelError::Socket`] if `setsockopt` fails.
pub fn set_socket_option<S>(
	sys: &S,
	fd: RawFd,
	scope: Scope,
	option: OptionName,
	value: OptionValue,
) -> Result<(), ChannelError>
where
	S: Syscalls + ?Sized,
{
	let descriptor = registry::resolve(option, scope)?;
	let payload = encode_payload(option, &descriptor, value)?;

	tracing::trace!(fd, %option, ?payload, "setting socket option");

	sys.setsockopt(fd, descriptor.level, descriptor.name, &payload)
	.map_err(ChannelError::from)
}
