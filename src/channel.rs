use crate::{
	addr::SockAddrUn,
	errors::{ChannelError, SocketError},
	net,
	syscall::{self, ConnectStatus, IoStatus, NativeThread, PollStatus},
	Credentials,
	Interest,
	OptionName,
	PosixSyscalls,
	SettableOption,
	SocketOption,
	SoPeerCred,
	Syscalls,
	UnixSocketAddr,
};
use parking_lot::{Mutex, MutexGuard};
use std::{
	ffi::c_int,
	fmt::{self, Debug, Display, Formatter},
	io::{self, Cursor},
	net::Shutdown,
	os::fd::{AsRawFd, IntoRawFd, RawFd},
	sync::atomic::{AtomicBool, Ordering},
	thread,
	time::Duration,
};

/// The lifecycle of a [`UnixChannel`].
///
/// States only ever advance, in the order listed here.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(i8)]
pub enum ChannelState {
	/// No socket has been created yet. A constructed channel is never in this state.
	Uninitialized = -1,

	/// The socket exists but is not connected.
	Unconnected = 0,

	/// A non-blocking connection attempt is in progress.
	Connecting = 1,

	/// The socket is connected to a peer.
	Connected = 2,

	/// The channel is closed, but the descriptor is still in use by another thread or a selector registration. The last user releases it.
	KillPending = 3,

	/// The descriptor has been released.
	Killed = 4,
}

/// The options that [`UnixChannel::get_option`] and [`UnixChannel::set_option`] accept.
pub const SUPPORTED_OPTIONS: &[OptionName] = &[
	OptionName::SendBufferSize,
	OptionName::ReceiveBufferSize,
	OptionName::KeepAlive,
	OptionName::Linger,
	OptionName::ReuseAddress,
	OptionName::NoDelay,
	OptionName::PeerCredentials,
	OptionName::ReceiveTimeout,
];

/// How long [`UnixChannel::close`] waits between signals to a thread that is still blocked.
const SIGNAL_RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug)]
enum Direction {
	Read,
	Write,
}

pub(crate) struct StateFields {
	pub(crate) state: ChannelState,
	holder: Option<RawFd>,
	local: Option<UnixSocketAddr>,
	remote: Option<UnixSocketAddr>,
	input_open: bool,
	output_open: bool,
	reader: Option<NativeThread>,
	writer: Option<NativeThread>,
	pub(crate) registrations: usize,
}

/// A Unix-domain socket channel.
///
/// A channel wraps one socket descriptor, which it owns exclusively and releases exactly once. All methods take `&self`, so a channel can be shared between threads: one thread may read while another writes and a third closes the channel. Closing a channel wakes any thread that is blocked on it; such threads then fail with [`ChannelError::AsynchronousClose`].
///
/// Channels start out in blocking mode. In non-blocking mode, reads and writes that cannot make progress return [`IoStatus::WouldBlock`], connecting returns before the connection is established (see [`finish_connect`][Self::finish_connect]), and [`poll`][Self::poll] can be used to wait for readiness.
///
/// The type parameter selects the [system call implementation][Syscalls]. Outside of tests, it is always [`PosixSyscalls`].
///
///
/// # Example
///
/// ```no_run
/// use std::io::{Cursor, Write};
/// use unix_channel::{UnixChannel, UnixSocketAddr};
///
/// # fn example_fn() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = UnixChannel::open()?;
/// channel.connect(&UnixSocketAddr::new("/run/app.sock"))?;
///
/// (&channel).write_all(b"ping\n")?;
///
/// let mut reply = Cursor::new([0u8; 64]);
/// channel.read(&mut reply)?;
/// # Ok(())
/// # }
/// ```
pub struct UnixChannel<S: Syscalls = PosixSyscalls> {
	sys: S,
	fd: RawFd,
	open: AtomicBool,
	blocking: AtomicBool,
	read_lock: Mutex<()>,
	write_lock: Mutex<()>,
	state: Mutex<StateFields>,
}

impl UnixChannel {
	/// Creates a new, unconnected stream channel.
	///
	///
	/// # Errors
	///
	/// [`ChannelError::Socket`] if the socket cannot be created.
	pub fn open() -> Result<Self, ChannelError> {
		Self::open_with(socket2::Type::STREAM)
	}

	/// Creates a new, unconnected channel of the given socket type, such as [`socket2::Type::DGRAM`].
	pub fn open_with(r#type: socket2::Type) -> Result<Self, ChannelError> {
		Self::with_syscalls(PosixSyscalls, r#type)
	}
}

impl<S: Syscalls> UnixChannel<S> {
	/// Creates a new, unconnected channel using the given system call implementation.
	pub fn with_syscalls(sys: S, r#type: socket2::Type) -> Result<Self, ChannelError> {
		let fd = sys.socket(r#type).map_err(ChannelError::from)?;

		tracing::debug!(fd, ?r#type, "created Unix-domain socket");

		Ok(Self::from_parts(sys, fd, ChannelState::Unconnected, true))
	}

	fn from_parts(sys: S, fd: RawFd, state: ChannelState, blocking: bool) -> Self {
		Self {
			sys,
			fd,
			open: AtomicBool::new(true),
			blocking: AtomicBool::new(blocking),
			read_lock: Mutex::new(()),
			write_lock: Mutex::new(()),
			state: Mutex::new(StateFields {
				state,
				holder: Some(fd),
				local: None,
				remote: None,
				input_open: true,
				output_open: true,
				reader: None,
				writer: None,
				registrations: 0,
			}),
		}
	}

	/// The socket's file descriptor.
	///
	/// This stays the same after the channel is closed, so it remains usable for diagnostics, but by then it may refer to some other file.
	pub fn raw_fd(&self) -> RawFd {
		self.fd
	}

	/// The current lifecycle state.
	pub fn state(&self) -> ChannelState {
		self.state.lock().state
	}

	/// Whether the channel has not been closed yet.
	pub fn is_open(&self) -> bool {
		self.open.load(Ordering::Acquire)
	}

	/// Whether the channel is in blocking mode.
	pub fn is_blocking(&self) -> bool {
		self.blocking.load(Ordering::Acquire)
	}

	/// Whether the channel is connected.
	pub fn is_connected(&self) -> bool {
		self.state() == ChannelState::Connected
	}

	/// Whether a non-blocking connection attempt is in progress.
	pub fn is_connection_pending(&self) -> bool {
		self.state() == ChannelState::Connecting
	}

	/// Whether the channel has a local address.
	pub fn is_bound(&self) -> bool {
		self.state.lock().local.is_some()
	}

	/// Whether the input side is still open, that is, neither [shut down][Self::shutdown_input] nor closed.
	pub fn is_input_open(&self) -> bool {
		self.state.lock().input_open
	}

	/// Whether the output side is still open, that is, neither [shut down][Self::shutdown_output] nor closed.
	pub fn is_output_open(&self) -> bool {
		self.state.lock().output_open
	}

	/// The options supported by [`get_option`][Self::get_option] and [`set_option`][Self::set_option].
	pub fn supported_options(&self) -> &'static [OptionName] {
		SUPPORTED_OPTIONS
	}

	pub(crate) fn ensure_open(&self) -> Result<(), ChannelError> {
		match self.is_open() {
			true => Ok(()),
			false => Err(ChannelError::Closed),
		}
	}

	pub(crate) fn lock_state(&self) -> MutexGuard<'_, StateFields> {
		self.state.lock()
	}

	/// Switches between blocking and non-blocking mode.
	///
	///
	/// # Errors
	///
	/// * [`ChannelError::Closed`] if the channel is closed.
	/// * [`ChannelError::IllegalBlockingMode`] if switching to blocking mode while the channel is [registered][Self::register].
	/// * [`ChannelError::Socket`] if the mode cannot be changed.
	pub fn configure_blocking(&self, blocking: bool) -> Result<(), ChannelError> {
		let _read = self.read_lock.lock();
		let _write = self.write_lock.lock();
		let state = self.state.lock();

		self.ensure_open()?;

		if blocking == self.is_blocking() {
			return Ok(());
		}

		if blocking && state.registrations > 0 {
			return Err(ChannelError::IllegalBlockingMode);
		}

		syscall::set_blocking(&self.sys, self.fd, blocking)?;
		self.blocking.store(blocking, Ordering::Release);
		Ok(())
	}

	/// Records the calling thread as using the descriptor in the given direction.
	fn begin_locked(&self, state: &mut StateFields, direction: Direction) {
		let current = Some(NativeThread::current());

		match direction {
			Direction::Read => state.reader = current,
			Direction::Write => state.writer = current,
		}
	}

	/// Undoes [`begin_locked`][Self::begin_locked], performs a deferred release if the channel was closed in the meantime, and reports an asynchronous close if the operation did not complete.
	fn end(&self, direction: Direction, completed: bool) -> Result<(), ChannelError> {
		{
			let mut state = self.state.lock();

			match direction {
				Direction::Read => state.reader = None,
				Direction::Write => state.writer = None,
			}

			if state.state == ChannelState::KillPending {
				self.deferred_kill(&mut state);
			}
		}

		if !completed && !self.is_open() {
			return Err(ChannelError::AsynchronousClose);
		}

		Ok(())
	}

	/// Releases the descriptor, unless another thread or a selector registration is still using it, in which case the release is deferred to that user.
	pub(crate) fn kill_locked(&self, state: &mut StateFields) -> Result<(), ChannelError> {
		if state.state == ChannelState::Killed {
			return Ok(());
		}

		if state.reader.is_some() || state.writer.is_some() || state.registrations > 0 {
			state.state = ChannelState::KillPending;
			tracing::debug!(fd = self.fd, "descriptor still in use; deferring release");
			return Ok(());
		}

		state.state = ChannelState::Killed;

		if let Some(fd) = state.holder.take() {
			syscall::close(&self.sys, fd)
			.map_err(|error| ChannelError::Close { fd, error: error.error })?;

			tracing::debug!(fd, "released channel descriptor");
		}

		Ok(())
	}

	pub(crate) fn deferred_kill(&self, state: &mut StateFields) {
		if let Err(error) = self.kill_locked(state) {
			tracing::warn!(fd = self.fd, %error, "deferred release of channel descriptor failed");
		}
	}

	/// Closes the channel.
	///
	/// Closing is idempotent: only the first call has any effect. Threads blocked reading or writing are woken by shutting the socket down, and threads blocked connecting or polling are interrupted with a [signal][Syscalls::signal]. This returns once all of them have left the channel. The descriptor is released as soon as no thread or selector registration is using it anymore.
	///
	/// # Errors
	///
	/// [`ChannelError::Close`] if the descriptor was released right away and `close` failed. The channel counts as closed regardless.
	pub fn close(&self) -> Result<(), ChannelError> {
		if self.open.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire).is_err() {
			return Ok(());
		}

		let mut state = self.state.lock();
		state.input_open = false;
		state.output_open = false;

		if let Some(fd) = state.holder {
			if state.reader.is_some() || state.writer.is_some() {
				if let Err(error) = self.sys.pre_close(fd) {
					tracing::warn!(fd, %error, "couldn't wake threads blocked on the channel");
				}
			}
		}

		tracing::debug!(fd = self.fd, "closing channel");

		let result = self.kill_locked(&mut state);
		drop(state);

		self.signal_blocked_threads();
		result
	}

	/// Signals the threads still using the descriptor until all of them have let go of it.
	///
	/// A signal that arrives before its thread has entered the system call is lost, so signalling repeats until every recorded thread is gone.
	fn signal_blocked_threads(&self) {
		loop {
			{
				let state = self.state.lock();
				let threads = [state.reader, state.writer];

				if threads.iter().all(Option::is_none) {
					return;
				}

				for thread in threads.into_iter().flatten() {
					if let Err(error) = self.sys.signal(thread) {
						tracing::warn!(fd = self.fd, %error, "couldn't wake a thread blocked on the channel");
						return;
					}
				}
			}

			thread::sleep(SIGNAL_RETRY_INTERVAL);
		}
	}

	fn close_quietly(&self) {
		if let Err(error) = self.close() {
			tracing::warn!(fd = self.fd, %error, "couldn't close channel after a failure");
		}
	}

	/// Binds the channel to a local address. With `None`, the operating system chooses one (on Linux, a name in the abstract namespace).
	///
	///
	/// # Errors
	///
	/// * [`ChannelError::Closed`] if the channel is closed.
	/// * [`ChannelError::ConnectionPending`] if a connection attempt is in progress.
	/// * [`ChannelError::AlreadyBound`] if the channel already has a local address.
	/// * [`ChannelError::InvalidUnixPath`] if the address cannot be encoded. The channel stays open.
	/// * [`ChannelError::Socket`] if `bind` fails. The channel is closed in that case.
	pub fn bind(&self, address: Option<&UnixSocketAddr>) -> Result<(), ChannelError> {
		let _read = self.read_lock.lock();
		let _write = self.write_lock.lock();
		let mut state = self.state.lock();

		self.ensure_open()?;

		if state.state == ChannelState::Connecting {
			return Err(ChannelError::ConnectionPending);
		}

		if state.local.is_some() {
			return Err(ChannelError::AlreadyBound);
		}

		let unnamed = UnixSocketAddr::unnamed();
		let record = SockAddrUn::new(address.unwrap_or(&unnamed))?;

		let result =
			syscall::bind(&self.sys, self.fd, &record)
			.and_then(|()| syscall::local_addr(&self.sys, self.fd));

		match result {
			Ok(local) => {
				let local = local.to_addr();
				tracing::debug!(fd = self.fd, %local, "bound channel");
				state.local = Some(local);
				Ok(())
			},
			Err(error) => {
				drop(state);
				self.close_quietly();
				Err(error.into())
			},
		}
	}

	/// Connects the channel to `address`.
	///
	/// In blocking mode, this returns `true` once the connection is established. In non-blocking mode, it may instead return `false`, meaning the connection is still being established; call [`finish_connect`][Self::finish_connect] to complete it.
	///
	///
	/// # Errors
	///
	/// * [`ChannelError::InvalidUnixPath`] if the address cannot be encoded.
	/// * [`ChannelError::Closed`] if the channel is closed.
	/// * [`ChannelError::AlreadyConnected`] or [`ChannelError::ConnectionPending`] if the channel is not in its initial state.
	/// * [`ChannelError::AsynchronousClose`] if another thread closed the channel during the attempt.
	/// * [`ChannelError::Socket`] if `connect` fails. The channel is closed in that case.
	pub fn connect(&self, address: &UnixSocketAddr) -> Result<bool, ChannelError> {
		let record = SockAddrUn::new(address)?;

		let _read = self.read_lock.lock();
		let _write = self.write_lock.lock();

		{
			let mut state = self.state.lock();
			self.ensure_open()?;

			match state.state {
				ChannelState::Connected => return Err(ChannelError::AlreadyConnected),
				ChannelState::Connecting => return Err(ChannelError::ConnectionPending),
				_ => {},
			}

			self.begin_locked(&mut state, Direction::Read);
		}

		let result = loop {
			match syscall::connect(&self.sys, self.fd, &record) {
				Ok(ConnectStatus::Interrupted) if self.is_open() => {
					tracing::trace!(fd = self.fd, "connect interrupted; retrying");
				},
				result => break result,
			}
		};

		self.end(Direction::Read, false)?;

		match result {
			Ok(ConnectStatus::Connected) => {
				self.mark_connected(Some(address.clone()))?;
				tracing::debug!(fd = self.fd, %address, "connected");
				Ok(true)
			},

			Ok(ConnectStatus::InProgress) => {
				let mut state = self.state.lock();
				self.ensure_still_open()?;
				state.state = ChannelState::Connecting;
				state.remote = Some(address.clone());
				tracing::debug!(fd = self.fd, %address, "connection in progress");
				Ok(false)
			},

			Ok(ConnectStatus::Interrupted) => Err(ChannelError::AsynchronousClose),

			Err(error) => {
				self.close_quietly();
				Err(error.into())
			},
		}
	}

	/// Completes a connection started by [`connect`][Self::connect].
	///
	/// Returns `true` if the channel is connected. In blocking mode, this waits until the attempt succeeds or fails. In non-blocking mode, it makes one attempt and returns `false` if the connection is still being established.
	///
	///
	/// # Errors
	///
	/// * [`ChannelError::Closed`] if the channel is closed.
	/// * [`ChannelError::NoConnectionPending`] if `connect` was not called.
	/// * [`ChannelError::AsynchronousClose`] if another thread closed the channel during the attempt.
	/// * [`ChannelError::Socket`] if the connection attempt fails. The channel is closed in that case.
	pub fn finish_connect(&self) -> Result<bool, ChannelError> {
		let _read = self.read_lock.lock();
		let _write = self.write_lock.lock();

		let record = {
			let mut state = self.state.lock();
			self.ensure_open()?;

			match state.state {
				ChannelState::Connected => return Ok(true),
				ChannelState::Connecting => {},
				_ => return Err(ChannelError::NoConnectionPending),
			}

			let remote = state.remote.as_ref().ok_or(ChannelError::NoConnectionPending)?;
			let record = SockAddrUn::new(remote)?;

			self.begin_locked(&mut state, Direction::Read);
			record
		};

		let blocking = self.is_blocking();

		let result: Result<bool, ChannelError> = loop {
			match syscall::connect(&self.sys, self.fd, &record) {
				Ok(ConnectStatus::Connected) => break Ok(true),

				Err(error) if error.raw_os_error() == Some(libc::EISCONN) => break Ok(true),

				Ok(ConnectStatus::Interrupted) if self.is_open() => {
					tracing::trace!(fd = self.fd, "finishing connect interrupted; retrying");
				},

				Ok(ConnectStatus::InProgress) if blocking && self.is_open() => {
					match syscall::poll(&self.sys, self.fd, libc::POLLOUT, -1) {
						Err(error) => break Err(error.into()),
						Ok(_) if !self.is_open() => break Ok(false),
						Ok(_) => {},
					}
				},

				Ok(_) => break Ok(false),

				Err(error) => break Err(error.into()),
			}
		};

		self.end(Direction::Read, false)?;

		match result {
			Ok(true) => {
				self.mark_connected(None)?;
				tracing::debug!(fd = self.fd, "connection established");
				Ok(true)
			},
			Ok(false) => Ok(false),
			Err(error) => {
				self.close_quietly();
				Err(error)
			},
		}
	}

	fn ensure_still_open(&self) -> Result<(), ChannelError> {
		self.ensure_open().map_err(|_| ChannelError::AsynchronousClose)
	}

	fn mark_connected(&self, remote: Option<UnixSocketAddr>) -> Result<(), ChannelError> {
		let mut state = self.state.lock();
		self.ensure_still_open()?;

		state.state = ChannelState::Connected;

		if remote.is_some() {
			state.remote = remote;
		}

		if state.local.is_none() {
			state.local =
				syscall::local_addr(&self.sys, self.fd)
				.ok()
				.map(|local| local.to_addr());
		}

		Ok(())
	}

	/// Checks that the channel is open and connected, and records the calling thread. Returns `false` if the requested direction has been shut down.
	fn begin_transfer(&self, direction: Direction) -> Result<bool, ChannelError> {
		let mut state = self.state.lock();
		self.ensure_open()?;

		if state.state != ChannelState::Connected {
			return Err(ChannelError::NotYetConnected);
		}

		let direction_open = match direction {
			Direction::Read => state.input_open,
			Direction::Write => state.output_open,
		};

		if direction_open {
			self.begin_locked(&mut state, direction);
		}

		Ok(direction_open)
	}

	fn read_with<F>(&self, op: F) -> Result<IoStatus, ChannelError>
	where
		F: FnOnce(&S, RawFd) -> Result<IoStatus, SocketError>,
	{
		let _read = self.read_lock.lock();

		if !self.begin_transfer(Direction::Read)? {
			return Ok(IoStatus::Eof);
		}

		let result = op(&self.sys, self.fd).map_err(ChannelError::from);
		let completed = matches!(&result, Ok(status) if status.made_progress());

		self.end(Direction::Read, completed)?;

		if !completed && !self.state.lock().input_open {
			return Ok(IoStatus::Eof);
		}

		result
	}

	fn write_with<F>(&self, op: F) -> Result<IoStatus, ChannelError>
	where
		F: FnOnce(&S, RawFd) -> Result<IoStatus, SocketError>,
	{
		let _write = self.write_lock.lock();

		if !self.begin_transfer(Direction::Write)? {
			return Err(ChannelError::Closed);
		}

		let result = op(&self.sys, self.fd).map_err(ChannelError::from);
		let completed = matches!(&result, Ok(status) if status.made_progress());

		self.end(Direction::Write, completed)?;

		if !completed && !self.state.lock().output_open {
			return Err(ChannelError::AsynchronousClose);
		}

		result
	}

	/// Reads into the unfilled part of `window`, advancing its position.
	///
	/// Returns [`IoStatus::Eof`] once the peer has stopped sending or the input side has been [shut down][Self::shutdown_input].
	///
	///
	/// # Errors
	///
	/// * [`ChannelError::Closed`] if the channel is closed.
	/// * [`ChannelError::NotYetConnected`] if the channel is not connected.
	/// * [`ChannelError::AsynchronousClose`] if another thread closed the channel before any data arrived.
	/// * [`ChannelError::Socket`] if `read` fails.
	pub fn read<B: AsMut<[u8]>>(&self, window: &mut Cursor<B>) -> Result<IoStatus, ChannelError> {
		self.read_with(|sys, fd| syscall::read(sys, fd, window))
	}

	/// Reads into several windows with a single system call, filling them in order.
	pub fn read_many<B: AsMut<[u8]>>(&self, windows: &mut [Cursor<B>]) -> Result<IoStatus, ChannelError> {
		self.read_with(|sys, fd| syscall::read_many(sys, fd, windows))
	}

	/// Writes the remaining part of `window`, advancing its position past the bytes written.
	///
	///
	/// # Errors
	///
	/// * [`ChannelError::Closed`] if the channel is closed or its output side has been [shut down][Self::shutdown_output].
	/// * [`ChannelError::NotYetConnected`] if the channel is not connected.
	/// * [`ChannelError::AsynchronousClose`] if another thread closed the channel, or shut down its output, before any data was written.
	/// * [`ChannelError::Socket`] if `write` fails.
	pub fn write<B: AsRef<[u8]>>(&self, window: &mut Cursor<B>) -> Result<IoStatus, ChannelError> {
		self.write_with(|sys, fd| syscall::write(sys, fd, window))
	}

	/// Writes from several windows with a single system call, draining them in order.
	pub fn write_many<B: AsRef<[u8]>>(&self, windows: &mut [Cursor<B>]) -> Result<IoStatus, ChannelError> {
		self.write_with(|sys, fd| syscall::write_many(sys, fd, windows))
	}

	fn shutdown_direction(&self, direction: Direction) -> Result<(), ChannelError> {
		let mut state = self.state.lock();
		self.ensure_open()?;

		if state.state != ChannelState::Connected {
			return Err(ChannelError::NotYetConnected);
		}

		let (is_open, how) = match direction {
			Direction::Read => (&mut state.input_open, Shutdown::Read),
			Direction::Write => (&mut state.output_open, Shutdown::Write),
		};

		if *is_open {
			syscall::shutdown(&self.sys, self.fd, how)?;
			*is_open = false;
			tracing::debug!(fd = self.fd, ?how, "shut down");
		}

		Ok(())
	}

	/// Shuts down the input side of the connection. Subsequent reads report end of stream.
	///
	/// Shutting down an already shut down side does nothing.
	///
	///
	/// # Errors
	///
	/// [`ChannelError::Closed`] if the channel is closed, [`ChannelError::NotYetConnected`] if it is not connected, or [`ChannelError::Socket`] if `shutdown` fails.
	pub fn shutdown_input(&self) -> Result<(), ChannelError> {
		self.shutdown_direction(Direction::Read)
	}

	/// Shuts down the output side of the connection. The peer sees end of stream; subsequent writes fail with [`ChannelError::Closed`].
	///
	/// Errors are as with [`shutdown_input`][Self::shutdown_input].
	pub fn shutdown_output(&self) -> Result<(), ChannelError> {
		self.shutdown_direction(Direction::Write)
	}

	/// Waits for the channel to become ready for any of the operations in `interest`, for at most `timeout` (or indefinitely if `None`).
	///
	/// Use [`translate_ready_ops`][Self::translate_ready_ops] to interpret the returned events.
	///
	///
	/// # Errors
	///
	/// * [`ChannelError::IllegalBlockingMode`] if the channel is in blocking mode.
	/// * [`ChannelError::Closed`] if the channel is closed.
	/// * [`ChannelError::AsynchronousClose`] if another thread closed the channel while waiting.
	/// * [`ChannelError::Socket`] if `poll` fails.
	pub fn poll(&self, interest: Interest, timeout: Option<Duration>) -> Result<PollStatus, ChannelError> {
		if self.is_blocking() {
			return Err(ChannelError::IllegalBlockingMode);
		}

		let timeout_ms: c_int = match timeout {
			None => -1,
			Some(timeout) => timeout_millis(timeout),
		};

		let _read = self.read_lock.lock();

		{
			let mut state = self.state.lock();
			self.ensure_open()?;
			self.begin_locked(&mut state, Direction::Read);
		}

		let result = syscall::poll(&self.sys, self.fd, crate::selector::translate_interest(interest), timeout_ms);
		let completed = matches!(result, Ok(PollStatus::Ready(_)));

		self.end(Direction::Read, completed)?;

		Ok(result?)
	}

	/// Reads a socket option.
	///
	///
	/// # Errors
	///
	/// * [`ChannelError::UnsupportedOption`] if the option is not one of the [supported options][Self::supported_options], or is not available on this platform.
	/// * [`ChannelError::Closed`] if the channel is closed.
	/// * [`ChannelError::Socket`] if `getsockopt` fails.
	pub fn get_option<O: SocketOption>(&self, _option: O) -> Result<O::Value, ChannelError> {
		check_supported(O::NAME)?;

		let _state = self.state.lock();
		self.ensure_open()?;

		let value = net::get_socket_option(&self.sys, self.fd, O::SCOPE, O::NAME)?;
		Ok(O::decode(value))
	}

	/// Changes a socket option.
	///
	///
	/// # Errors
	///
	/// As with [`get_option`][Self::get_option], and additionally [`ChannelError::InvalidArgument`] if the value is out of range. Nothing is changed in that case.
	pub fn set_option<O: SettableOption>(&self, _option: O, value: O::Value) -> Result<(), ChannelError> {
		check_supported(O::NAME)?;

		let _state = self.state.lock();
		self.ensure_open()?;

		let value = O::encode(value)?;
		net::set_socket_option(&self.sys, self.fd, O::SCOPE, O::NAME, value)
	}

	/// The credentials of the connected peer, or `None` if the channel is not connected.
	///
	///
	/// # Errors
	///
	/// As with [`get_option`][Self::get_option] for [`SoPeerCred`].
	pub fn credentials(&self) -> Result<Option<Credentials>, ChannelError> {
		self.ensure_open()?;

		if !self.is_connected() {
			return Ok(None);
		}

		self.get_option(SoPeerCred)
	}

	/// The address that the channel is bound to, if any.
	///
	///
	/// # Errors
	///
	/// [`ChannelError::Closed`] if the channel is closed.
	pub fn local_address(&self) -> Result<Option<UnixSocketAddr>, ChannelError> {
		let state = self.state.lock();
		self.ensure_open()?;
		Ok(state.local.clone())
	}

	/// The address of the peer that the channel is connected (or connecting) to, if any.
	///
	/// For channels that were not connected with [`connect`][Self::connect], such as accepted connections, the address is asked of the operating system the first time.
	///
	///
	/// # Errors
	///
	/// [`ChannelError::Closed`] if the channel is closed, or [`ChannelError::Socket`] if `getpeername` fails.
	pub fn remote_address(&self) -> Result<Option<UnixSocketAddr>, ChannelError> {
		let mut state = self.state.lock();
		self.ensure_open()?;

		if state.remote.is_none() && state.state == ChannelState::Connected {
			let remote = syscall::peer_addr(&self.sys, self.fd)?;
			state.remote = Some(remote.to_addr());
		}

		Ok(state.remote.clone())
	}
}

/// Converts a poll timeout to whole milliseconds, rounding up so that a short, nonzero timeout still waits.
fn timeout_millis(timeout: Duration) -> c_int {
	let millis = (timeout.as_nanos() + 999_999) / 1_000_000;
	c_int::try_from(millis).unwrap_or(c_int::MAX)
}

fn check_supported(option: OptionName) -> Result<(), ChannelError> {
	match SUPPORTED_OPTIONS.contains(&option) {
		true => Ok(()),
		false => Err(ChannelError::UnsupportedOption { option }),
	}
}

impl<S: Syscalls> AsRawFd for UnixChannel<S> {
	fn as_raw_fd(&self) -> RawFd {
		self.fd
	}
}

impl<S: Syscalls> Drop for UnixChannel<S> {
	fn drop(&mut self) {
		if self.is_open() {
			tracing::debug!(fd = self.fd, "dropping open channel");
		}

		if let Err(error) = self.close() {
			tracing::warn!(fd = self.fd, %error, "couldn't close channel on drop");
		}
	}
}

impl<S: Syscalls> Display for UnixChannel<S> {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "UnixChannel[")?;

		if !self.is_open() {
			return write!(f, "closed]");
		}

		let state = self.state.lock();

		match state.state {
			ChannelState::Connecting => write!(f, "connection-pending")?,
			ChannelState::Connected => {
				write!(f, "connected")?;
				if !state.input_open { write!(f, " ishut")?; }
				if !state.output_open { write!(f, " oshut")?; }
			},
			_ => write!(f, "unconnected")?,
		}

		if let Some(local) = &state.local {
			write!(f, " localAddress={local}")?;
		}

		if let Some(remote) = &state.remote {
			write!(f, " remoteAddress={remote}")?;
		}

		write!(f, "]")
	}
}

impl<S: Syscalls> Debug for UnixChannel<S> {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		let state = self.state.lock();

		f.debug_struct("UnixChannel")
		.field("fd", &self.fd)
		.field("open", &self.is_open())
		.field("blocking", &self.is_blocking())
		.field("state", &state.state)
		.field("local", &state.local)
		.field("remote", &state.remote)
		.finish_non_exhaustive()
	}
}

impl<S: Syscalls> io::Read for &UnixChannel<S> {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		let mut window = Cursor::new(buf);

		match UnixChannel::<S>::read(*self, &mut window)? {
			IoStatus::Transferred(n) => Ok(n),
			IoStatus::Eof => Ok(0),
			IoStatus::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
		}
	}
}

impl<S: Syscalls> io::Read for UnixChannel<S> {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		io::Read::read(&mut &*self, buf)
	}
}

impl<S: Syscalls> io::Write for &UnixChannel<S> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let mut window = Cursor::new(buf);

		match UnixChannel::<S>::write(*self, &mut window)? {
			IoStatus::Transferred(n) => Ok(n),
			IoStatus::Eof => Ok(0),
			IoStatus::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl<S: Syscalls> io::Write for UnixChannel<S> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		io::Write::write(&mut &*self, buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

/// Wraps a connected Unix-domain stream socket, such as one returned by [`socket2::Socket::accept`] on a [listening socket][crate::listen()].
///
/// The socket keeps its blocking mode.
///
///
/// # Errors
///
/// [`ChannelError::InappropriateSocket`] if the socket is not a connected Unix-domain stream socket. The socket is closed in that case.
impl TryFrom<socket2::Socket> for UnixChannel {
	type Error = ChannelError;

	fn try_from(socket: socket2::Socket) -> Result<Self, Self::Error> {
		let is_unix_stream =
			socket.domain()? == socket2::Domain::UNIX &&
			socket.r#type()? == socket2::Type::STREAM;

		if !is_unix_stream || socket.peer_addr().is_err() {
			return Err(ChannelError::InappropriateSocket);
		}

		let blocking = !socket.nonblocking()?;
		let fd = socket.into_raw_fd();
		let channel = Self::from_parts(PosixSyscalls, fd, ChannelState::Connected, blocking);

		channel.state.lock().local =
			syscall::local_addr(&channel.sys, fd)
			.ok()
			.map(|local| local.to_addr());

		Ok(channel)
	}
}
