//! Various errors that can be raised by this library.

use crate::OptionName;
use std::{
	io,
	os::fd::RawFd,
	path::PathBuf,
};

#[cfg(doc)]
use crate::{
	listen,
	UnixChannel,
	UnixSocketAddr,
};

#[cfg(doc)]
use std::str::FromStr;

/// The semantic category of a failed socket system call.
///
/// Every OS error code falls into exactly one category. Codes that are not specifically recognized fall into [`SocketErrorKind::Other`].
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum SocketErrorKind {
	/// `EPROTO`.
	#[display(fmt = "protocol error")]
	Protocol,

	/// `ECONNREFUSED` or `ENOTCONN`.
	#[display(fmt = "connection refused")]
	ConnectionRefused,

	/// `ETIMEDOUT`.
	#[display(fmt = "connection timed out")]
	TimedOut,

	/// `EHOSTUNREACH`.
	#[display(fmt = "no route to host")]
	NoRouteToHost,

	/// `EADDRINUSE` or `EADDRNOTAVAIL`.
	#[display(fmt = "address in use or unavailable")]
	AddressInUse,

	/// Any other error code.
	#[display(fmt = "socket error")]
	Other,
}

impl SocketErrorKind {
	/// Categorizes a raw OS error code.
	pub fn from_raw_os_error(code: i32) -> Self {
		match code {
			libc::EPROTO => Self::Protocol,
			libc::ECONNREFUSED | libc::ENOTCONN => Self::ConnectionRefused,
			libc::ETIMEDOUT => Self::TimedOut,
			libc::EHOSTUNREACH => Self::NoRouteToHost,
			libc::EADDRINUSE | libc::EADDRNOTAVAIL => Self::AddressInUse,
			_ => Self::Other,
		}
	}
}

/// A socket system call failed.
///
/// The original [`io::Error`] is kept as-is, so the OS error code and message remain available for diagnostics.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {error}")]
#[non_exhaustive]
pub struct SocketError {
	/// The category that the OS error code falls into.
	pub kind: SocketErrorKind,

	/// The error reported by the operating system.
	#[source]
	pub error: io::Error,
}

impl SocketError {
	/// Returns the raw OS error code, if the error came from the operating system.
	pub fn raw_os_error(&self) -> Option<i32> {
		self.error.raw_os_error()
	}
}

impl From<io::Error> for SocketError {
	fn from(error: io::Error) -> Self {
		let kind = match error.raw_os_error() {
			Some(code) => SocketErrorKind::from_raw_os_error(code),
			None => SocketErrorKind::Other,
		};

		Self { kind, error }
	}
}

impl From<SocketError> for io::Error {
	fn from(error: SocketError) -> Self {
		error.error
	}
}

/// An error raised by an operation on a [`UnixChannel`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ChannelError {
	/// The channel has been closed, or the requested direction has been shut down.
	#[error("channel is closed")]
	Closed,

	/// The channel was closed by another thread while this operation was in progress.
	#[error("channel was closed by another thread during the operation")]
	AsynchronousClose,

	/// [`UnixChannel::connect`] was called on a channel that is already connected.
	#[error("channel is already connected")]
	AlreadyConnected,

	/// A non-blocking connection attempt is still in progress.
	#[error("a connection attempt is already pending")]
	ConnectionPending,

	/// [`UnixChannel::finish_connect`] was called, but no connection attempt was started.
	#[error("no connection attempt is pending")]
	NoConnectionPending,

	/// The operation requires a connected channel.
	#[error("channel is not yet connected")]
	NotYetConnected,

	/// [`UnixChannel::bind`] was called on a channel that already has a local address.
	#[error("channel is already bound")]
	AlreadyBound,

	/// The option is not supported by this kind of channel, or on this platform.
	#[error("the `{option}` option is not supported")]
	#[non_exhaustive]
	UnsupportedOption {
		/// The option that was requested.
		option: OptionName,
	},

	/// The option value is outside of its permitted range.
	#[error("invalid value {value} for the `{option}` option: {reason}")]
	#[non_exhaustive]
	InvalidArgument {
		/// The option being set.
		option: OptionName,

		/// The rejected value.
		value: i64,

		/// What is wrong with the value.
		reason: &'static str,
	},

	/// The operation is only valid while the channel is in non-blocking mode.
	#[error("operation requires a non-blocking channel")]
	IllegalBlockingMode,

	/// The socket path cannot be encoded into a `sockaddr_un` record.
	#[error("invalid Unix-domain socket path {path:?}: {reason}")]
	#[non_exhaustive]
	InvalidUnixPath {
		/// The offending path.
		path: PathBuf,

		/// Why the path cannot be used.
		reason: &'static str,
	},

	/// Closing the file descriptor failed. The descriptor may still be open.
	#[error("couldn't close file descriptor {fd}: {error}")]
	#[non_exhaustive]
	Close {
		/// The file descriptor that could not be closed.
		fd: RawFd,

		/// The error that this one arose from.
		#[source]
		error: io::Error,
	},

	/// A socket that was to be wrapped in a [`UnixChannel`] is not a connected Unix-domain stream socket.
	#[error("socket is not a connected Unix-domain stream socket")]
	InappropriateSocket,

	/// A socket system call failed.
	#[error("{0}")]
	Socket(#[from] SocketError),
}

impl ChannelError {
	/// Returns the translated OS error, if this error came from a failed system call.
	pub fn socket_error(&self) -> Option<&SocketError> {
		match self {
			Self::Socket(error) => Some(error),
			_ => None,
		}
	}
}

impl From<io::Error> for ChannelError {
	fn from(error: io::Error) -> Self {
		Self::Socket(error.into())
	}
}

impl From<ChannelError> for io::Error {
	fn from(error: ChannelError) -> Self {
		use io::ErrorKind as EK;

		let kind = match &error {
			ChannelError::Closed                      => EK::BrokenPipe      ,
			ChannelError::AsynchronousClose           => EK::BrokenPipe      ,
			ChannelError::AlreadyConnected            => EK::AlreadyExists   ,
			ChannelError::ConnectionPending           => EK::WouldBlock      ,
			ChannelError::NoConnectionPending         => EK::NotConnected    ,
			ChannelError::NotYetConnected             => EK::NotConnected    ,
			ChannelError::AlreadyBound                => EK::AddrInUse       ,
			ChannelError::UnsupportedOption { .. }    => EK::Unsupported     ,
			ChannelError::InvalidArgument { .. }      => EK::InvalidInput    ,
			ChannelError::IllegalBlockingMode         => EK::InvalidInput    ,
			ChannelError::InvalidUnixPath { .. }      => EK::InvalidInput    ,
			ChannelError::InappropriateSocket         => EK::InvalidInput    ,

			| ChannelError::Close { error, .. }
			| ChannelError::Socket(SocketError { error, .. })
			=> error.kind(),
		};

		io::Error::new(kind, error)
	}
}

/// An error parsing a [`UnixSocketAddr`] [from a string][FromStr].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum InvalidUnixSocketAddrError {
	/// The string is empty.
	#[error("invalid Unix-domain socket address: must not be empty")]
	Empty,

	/// The string names an abstract socket (`@name`), but abstract sockets are not supported on this platform.
	#[error("abstract Unix-domain socket addresses are not supported on this platform")]
	AbstractNotSupported,
}

/// An error that occurred in [opening a listening socket][listen()].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ListenError {
	/// The [`UnixSocketAddr`] cannot be used as a listening address.
	#[error("invalid Unix-domain socket path: {error}")]
	#[non_exhaustive]
	InvalidUnixPath {
		/// The error that this one arose from.
		#[source]
		error: io::Error,
	},

	/// [`socket2::Socket::new`] failed.
	#[error("couldn't create socket: {error}")]
	#[non_exhaustive]
	CreateSocket {
		/// The error that this one arose from.
		#[source]
		error: io::Error,
	},

	/// There was an error creating any needed parent folders.
	#[error("couldn't create parent folders: {error}")]
	#[non_exhaustive]
	MkdirParents {
		/// The error that this one arose from.
		#[source]
		error: io::Error,
	},

	/// [`UnixSocketAddr::cleanup`] failed.
	#[error("{0}")]
	Cleanup(#[from] CleanupSocketError),

	/// [`socket2::Socket::bind`] failed.
	#[error("couldn't bind socket to address: {error}")]
	#[non_exhaustive]
	Bind {
		/// The error that this one arose from.
		#[source]
		error: io::Error,
	},

	/// [`socket2::Socket::listen`] failed.
	#[error("couldn't make the socket listen: {error}")]
	#[non_exhaustive]
	Listen {
		/// The error that this one arose from.
		#[source]
		error: io::Error,
	},
}

impl From<ListenError> for io::Error {
	fn from(error: ListenError) -> Self {
		let kind = match &error {
			| ListenError::InvalidUnixPath { error }
			| ListenError::CreateSocket { error }
			| ListenError::MkdirParents { error }
			| ListenError::Bind { error }
			| ListenError::Listen { error }
			| ListenError::Cleanup(
				| CleanupSocketError::Stat { error }
				| CleanupSocketError::Unlink { error }
			)
			=> error.kind(),
		};

		io::Error::new(kind, error)
	}
}

/// Error raised by [`UnixSocketAddr::cleanup`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CleanupSocketError {
	/// [`std::fs::symlink_metadata`] reported an error checking for a stale socket.
	#[error("couldn't check for a stale Unix-domain socket: {error}")]
	#[non_exhaustive]
	Stat {
		#[source]
		error: io::Error,
	},

	/// There is a stale socket at the designated path, but [`std::fs::remove_file`] reported an error removing it.
	#[error("couldn't remove the stale Unix-domain socket: {error}")]
	#[non_exhaustive]
	Unlink {
		#[source]
		error: io::Error,
	},
}

impl From<CleanupSocketError> for io::Error {
	fn from(error: CleanupSocketError) -> Self {
		let kind = match &error {
			| CleanupSocketError::Stat { error }
			| CleanupSocketError::Unlink { error }
			=> error.kind(),
		};

		io::Error::new(kind, error)
	}
}

#[test]
fn test_socket_error_kind_mapping() {
	for (code, kind) in [
		(libc::EPROTO, SocketErrorKind::Protocol),
		(libc::ECONNREFUSED, SocketErrorKind::ConnectionRefused),
		(libc::ENOTCONN, SocketErrorKind::ConnectionRefused),
		(libc::ETIMEDOUT, SocketErrorKind::TimedOut),
		(libc::EHOSTUNREACH, SocketErrorKind::NoRouteToHost),
		(libc::EADDRINUSE, SocketErrorKind::AddressInUse),
		(libc::EADDRNOTAVAIL, SocketErrorKind::AddressInUse),
		(libc::EBADF, SocketErrorKind::Other),
		(libc::ENOENT, SocketErrorKind::Other),
	] {
		let error = SocketError::from(io::Error::from_raw_os_error(code));
		assert_eq!(error.kind, kind);
		assert_eq!(error.raw_os_error(), Some(code));
	}

	let error = SocketError::from(io::Error::new(io::ErrorKind::Other, "not from the OS"));
	assert_eq!(error.kind, SocketErrorKind::Other);
}

#[test]
fn test_channel_error_into_io_error() {
	let error: io::Error = ChannelError::NotYetConnected.into();
	assert_eq!(error.kind(), io::ErrorKind::NotConnected);

	let error: io::Error = ChannelError::from(io::Error::from_raw_os_error(libc::ECONNREFUSED)).into();
	assert_eq!(error.kind(), io::ErrorKind::ConnectionRefused);
}
