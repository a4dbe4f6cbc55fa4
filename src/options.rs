use crate::{
	errors::ChannelError,
	SoKeepAlive,
	SoLinger,
	SoRcvBuf,
	SoRcvTimeo,
	SoSndBuf,
	Syscalls,
	UnixChannel,
};
use std::ffi::c_int;

/// Channel settings supplied by the user of your application, such as through command-line options or a configuration file.
///
/// Unset fields leave the operating system's defaults in place.
#[cfg_attr(feature = "serde", doc = r#"

This structure is suitable for deserializing with [`serde`], with one caveat: it is marked with the attribute `#[serde(deny_unknown_fields)]`, and therefore must not be referenced in a field marked `#[serde(flatten)]`.
"#)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(default, deny_unknown_fields))]
#[non_exhaustive]
pub struct ChannelUserOptions {
	/// Size of the socket send buffer, in bytes (`SO_SNDBUF`).
	#[cfg_attr(feature = "clap", arg(long))]
	pub send_buffer_size: Option<c_int>,

	/// Size of the socket receive buffer, in bytes (`SO_RCVBUF`).
	#[cfg_attr(feature = "clap", arg(long))]
	pub receive_buffer_size: Option<c_int>,

	/// Enable keep-alive messages (`SO_KEEPALIVE`).
	#[cfg_attr(feature = "clap", arg(long))]
	pub keep_alive: bool,

	/// Seconds to linger on close while unsent data remains (`SO_LINGER`). A negative value disables lingering.
	#[cfg_attr(feature = "clap", arg(long, allow_hyphen_values = true))]
	pub linger: Option<c_int>,

	/// Timeout for blocking reads, in milliseconds (`SO_RCVTIMEO`). Zero means no timeout.
	#[cfg_attr(feature = "clap", arg(long))]
	pub receive_timeout: Option<c_int>,

	/// Put channels into non-blocking mode.
	///
	/// A channel opened with [`connect`][crate::connect()] in non-blocking mode may still be connecting when it is returned.
	#[cfg_attr(feature = "clap", arg(long))]
	pub non_blocking: bool,

	/// Prevents the deletion of an existing socket at the path given to [`listen`][crate::listen()].
	#[cfg_attr(feature = "clap", arg(long))]
	pub unix_socket_no_unlink: bool,

	/// Maximum pending connections, for listening sockets. Default is 128.
	#[cfg_attr(feature = "clap", arg(long))]
	pub listen_socket_backlog: Option<c_int>,
}

impl ChannelUserOptions {
	/// The default value used when [`ChannelUserOptions::listen_socket_backlog`] is `None`.
	pub const DEFAULT_LISTEN_SOCKET_BACKLOG: c_int = 128;

	/// Applies these settings to a channel.
	///
	///
	/// # Errors
	///
	/// Any error from [`UnixChannel::set_option`] or [`UnixChannel::configure_blocking`]. Settings before the failing one remain applied.
	pub fn apply<S: Syscalls>(&self, channel: &UnixChannel<S>) -> Result<(), ChannelError> {
		if let Some(size) = self.send_buffer_size {
			channel.set_option(SoSndBuf, size)?;
		}

		if let Some(size) = self.receive_buffer_size {
			channel.set_option(SoRcvBuf, size)?;
		}

		if self.keep_alive {
			channel.set_option(SoKeepAlive, true)?;
		}

		if let Some(linger) = self.linger {
			channel.set_option(SoLinger, linger)?;
		}

		if let Some(timeout) = self.receive_timeout {
			channel.set_option(SoRcvTimeo, timeout)?;
		}

		if self.non_blocking {
			channel.configure_blocking(false)?;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::FakeSyscalls;
	use assert_matches::assert_matches;

	#[test]
	fn apply_sets_only_configured_options() {
		let sys = FakeSyscalls::default();
		let channel = UnixChannel::with_syscalls(sys.clone(), socket2::Type::STREAM).unwrap();

		ChannelUserOptions::default().apply(&channel).unwrap();
		assert_eq!(sys.calls("setsockopt"), 0);
		assert!(channel.is_blocking());

		let options = ChannelUserOptions {
			receive_buffer_size: Some(8192),
			linger: Some(-3),
			non_blocking: true,
			..Default::default()
		};
		options.apply(&channel).unwrap();

		assert_eq!(sys.calls("setsockopt"), 2);
		assert_eq!(channel.get_option(SoRcvBuf).unwrap(), 8192);
		assert_eq!(channel.get_option(SoLinger).unwrap(), -1);
		assert!(!channel.is_blocking());
	}

	#[test]
	fn apply_rejects_invalid_values() {
		let sys = FakeSyscalls::default();
		let channel = UnixChannel::with_syscalls(sys, socket2::Type::STREAM).unwrap();

		let options = ChannelUserOptions {
			send_buffer_size: Some(-1),
			..Default::default()
		};

		assert_matches!(options.apply(&channel), Err(ChannelError::InvalidArgument { .. }));
	}

	#[cfg(feature = "clap")]
	#[test]
	fn parse_command_line() {
		use clap::Parser;

		#[derive(Parser)]
		struct Cli {
			#[command(flatten)]
			options: ChannelUserOptions,
		}

		let cli = Cli::try_parse_from([
			"app",
			"--receive-buffer-size", "4096",
			"--linger", "-1",
			"--keep-alive",
			"--non-blocking",
		]).unwrap();

		assert_eq!(cli.options.receive_buffer_size, Some(4096));
		assert_eq!(cli.options.linger, Some(-1));
		assert!(cli.options.keep_alive);
		assert!(cli.options.non_blocking);
		assert_eq!(cli.options.send_buffer_size, None);
	}

	#[cfg(feature = "serde")]
	#[test]
	fn deserialize_config() {
		let options: ChannelUserOptions = serde_json::from_str(r#"{
			"send_buffer_size": 65536,
			"receive_timeout": 1500,
			"unix_socket_no_unlink": true
		}"#).unwrap();

		assert_eq!(options.send_buffer_size, Some(65536));
		assert_eq!(options.receive_timeout, Some(1500));
		assert!(options.unix_socket_no_unlink);
		assert!(!options.keep_alive);

		assert!(serde_json::from_str::<ChannelUserOptions>(r#"{ "bogus": 1 }"#).is_err());
	}
}
