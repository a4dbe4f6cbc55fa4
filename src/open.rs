use crate::{
	errors::{ChannelError, ListenError},
	ChannelUserOptions,
	UnixChannel,
	UnixSocketAddr,
};
use socket2::Socket;
use std::fs;

/// Opens a channel and connects it to `address`, according to the given options.
///
/// With [`ChannelUserOptions::non_blocking`] set, the connection may still be in progress when this returns; use [`UnixChannel::finish_connect`] to complete it.
///
///
/// # Example
///
/// ```no_run
/// use std::io::Write;
///
/// # fn example_fn() -> Result<(), Box<dyn std::error::Error>> {
/// // The address and options are specified by the user of your application.
/// let address: unix_channel::UnixSocketAddr = "/run/app.sock".parse()?;
/// let options = unix_channel::ChannelUserOptions::default();
///
/// let channel = unix_channel::connect(&address, &options)?;
/// (&channel).write_all(b"Hello, world!\n")?;
/// # Ok(())
/// # }
/// ```
///
///
/// # Errors
///
/// Any error from [`UnixChannel::open`], [`ChannelUserOptions::apply`], or [`UnixChannel::connect`]. The channel is closed if any step fails.
pub fn connect(
	address: &UnixSocketAddr,
	options: &ChannelUserOptions,
) -> Result<UnixChannel, ChannelError> {
	let channel = UnixChannel::open()?;
	options.apply(&channel)?;
	channel.connect(address)?;
	Ok(channel)
}

/// Opens a listening Unix-domain stream socket at `address`.
///
/// Unless [`ChannelUserOptions::unix_socket_no_unlink`] is set, a stale socket at the same path is deleted first. Any missing parent folders are created. Accept connections with [`accept`].
///
///
/// # Errors
///
/// See [`ListenError`].
pub fn listen(
	address: &UnixSocketAddr,
	options: &ChannelUserOptions,
) -> Result<Socket, ListenError> {
	let sockaddr =
		socket2::SockAddr::unix(address.path())
		.map_err(|error| ListenError::InvalidUnixPath { error })?;

	let socket =
		Socket::new(socket2::Domain::UNIX, socket2::Type::STREAM, None)
		.map_err(|error| ListenError::CreateSocket { error })?;

	// Only path-based addresses have anything on the file system to clean up or make room for.
	if !address.is_unnamed() && address.as_abstract_name().is_none() {
		if !options.unix_socket_no_unlink {
			address.cleanup()?;
		}

		if let Some(parent) = address.path().parent() {
			fs::create_dir_all(parent)
			.map_err(|error| ListenError::MkdirParents { error })?;
		}
	}

	socket.bind(&sockaddr)
	.map_err(|error| ListenError::Bind { error })?;

	let backlog = options.listen_socket_backlog.unwrap_or(ChannelUserOptions::DEFAULT_LISTEN_SOCKET_BACKLOG);

	socket.listen(backlog)
	.map_err(|error| ListenError::Listen { error })?;

	tracing::debug!(%address, backlog, "listening");

	Ok(socket)
}

/// Accepts a connection on a socket opened with [`listen`], and applies the given options to it.
///
///
/// # Errors
///
/// [`ChannelError::Socket`] if `accept` fails, or any error from [`ChannelUserOptions::apply`].
pub fn accept(
	listener: &Socket,
	options: &ChannelUserOptions,
) -> Result<UnixChannel, ChannelError> {
	let (socket, _) = listener.accept()?;
	let channel = UnixChannel::try_from(socket)?;
	options.apply(&channel)?;
	Ok(channel)
}
