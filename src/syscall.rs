//! The boundary between channels and the operating system.
//!
//! [`Syscalls`] is the raw seam: one method per socket system call, each reporting failure as an [`io::Error`] that carries the OS error code. [`PosixSyscalls`][crate::PosixSyscalls] is the real implementation. Channels are generic over it, so their state machine can be exercised against a scripted implementation.
//!
//! The free functions in this module are the contract that channels rely on. They retry interrupted calls where that is meaningful, turn expected conditions (such as a non-blocking call that would block) into ordinary outcomes, and translate everything else into a [`SocketError`] exactly once.

use crate::{
	addr::SockAddrUn,
	errors::SocketError,
	OptionPayload,
	PayloadKind,
};
use std::{
	ffi::{c_int, c_short},
	io::{self, Cursor, IoSlice, IoSliceMut},
	net::Shutdown,
	os::fd::RawFd,
};

/// Raw socket system calls, as used by [`UnixChannel`][crate::UnixChannel].
///
/// Implementations must not retry interrupted calls or interpret error codes; that is done by the functions in [this module][self]. Errors must carry the OS error code (as [`io::Error::from_raw_os_error`] does).
pub trait Syscalls: Send + Sync {
	/// Creates a Unix-domain socket of the given type, with the close-on-exec flag set.
	fn socket(&self, r#type: socket2::Type) -> io::Result<RawFd>;

	/// `read(2)`.
	fn read(&self, fd: RawFd, buf: &mut [u8]) -> io::Result<usize>;

	/// `write(2)`.
	fn write(&self, fd: RawFd, buf: &[u8]) -> io::Result<usize>;

	/// `readv(2)`.
	fn read_vectored(&self, fd: RawFd, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize>;

	/// `writev(2)`.
	fn write_vectored(&self, fd: RawFd, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

	/// `close(2)`.
	fn close(&self, fd: RawFd) -> io::Result<()>;

	/// Wakes threads blocked reading or writing on `fd`, without releasing it.
	///
	/// This is the first cancellation primitive used when a channel is closed while other threads are still using it. [`PosixSyscalls`][crate::PosixSyscalls] does this by shutting down both directions of the socket.
	fn pre_close(&self, fd: RawFd) -> io::Result<()>;

	/// Interrupts the system call that `thread` is blocked in, making it fail with `EINTR`.
	///
	/// This is the second cancellation primitive. Shutting a socket down does not wake a thread blocked in `connect` waiting for room in a listener's backlog, so closing a channel also signals every thread still using it.
	fn signal(&self, thread: NativeThread) -> io::Result<()>;

	/// Sets or clears `O_NONBLOCK`.
	fn set_nonblocking(&self, fd: RawFd, nonblocking: bool) -> io::Result<()>;

	/// `connect(2)`.
	fn connect(&self, fd: RawFd, addr: &SockAddrUn) -> io::Result<()>;

	/// `bind(2)`.
	fn bind(&self, fd: RawFd, addr: &SockAddrUn) -> io::Result<()>;

	/// `getsockname(2)`.
	fn local_addr(&self, fd: RawFd) -> io::Result<SockAddrUn>;

	/// `getpeername(2)`.
	fn peer_addr(&self, fd: RawFd) -> io::Result<SockAddrUn>;

	/// `poll(2)` on a single descriptor. Returns the received events, which are zero if the call timed out.
	///
	/// A negative `timeout_ms` waits indefinitely.
	fn poll(&self, fd: RawFd, events: c_short, timeout_ms: c_int) -> io::Result<c_short>;

	/// `shutdown(2)`.
	fn shutdown(&self, fd: RawFd, how: Shutdown) -> io::Result<()>;

	/// `getsockopt(2)`, reading a value of the given form.
	fn getsockopt(&self, fd: RawFd, level: c_int, name: c_int, kind: PayloadKind) -> io::Result<OptionPayload>;

	/// `setsockopt(2)`.
	fn setsockopt(&self, fd: RawFd, level: c_int, name: c_int, payload: &OptionPayload) -> io::Result<()>;
}

/// A thread that is inside a system call on a channel, as recorded so that [`Syscalls::signal`] can interrupt it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NativeThread(libc::pthread_t);

// Safety: a `pthread_t` is only an identifier. Where it is a pointer, this crate never dereferences it.
unsafe impl Send for NativeThread {}
unsafe impl Sync for NativeThread {}

impl NativeThread {
	/// The calling thread.
	pub fn current() -> Self {
		// Safety: `pthread_self` has no preconditions and cannot fail.
		Self(unsafe { libc::pthread_self() })
	}

	/// The raw `pthread_t`.
	pub fn as_raw(self) -> libc::pthread_t {
		self.0
	}
}

/// Outcome of a read or write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoStatus {
	/// This many bytes were transferred. Only zero if the window was empty.
	Transferred(usize),

	/// The channel is non-blocking and no bytes could be transferred right now.
	WouldBlock,

	/// The peer will not send any more data.
	Eof,
}

impl IoStatus {
	/// Whether any bytes were transferred.
	pub fn made_progress(&self) -> bool {
		matches!(self, Self::Transferred(n) if *n > 0)
	}
}

/// Outcome of a connection attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectStatus {
	/// The connection is established.
	Connected,

	/// The connection is being established in the background.
	InProgress,

	/// A signal interrupted the call. The attempt should be repeated.
	Interrupted,
}

/// Outcome of a `poll`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollStatus {
	/// The descriptor is ready. Contains the received `poll` events.
	Ready(c_short),

	/// The timeout expired first.
	TimedOut,

	/// A signal interrupted the call.
	Interrupted,
}

fn window_start(position: u64, len: usize) -> usize {
	usize::try_from(position).map_or(len, |position| position.min(len))
}

/// Reads into the unfilled part of `window` (from its position to its end), advancing the position by the number of bytes read.
///
/// Interrupted calls are retried. If no data is available on a non-blocking socket, the result is [`IoStatus::WouldBlock`] and the position is left unchanged. An empty window is not passed to the operating system at all.
pub fn read<S, B>(sys: &S, fd: RawFd, window: &mut Cursor<B>) -> Result<IoStatus, SocketError>
where
	S: Syscalls + ?Sized,
	B: AsMut<[u8]>,
{
	let len = window.get_mut().as_mut().len();
	let start = window_start(window.position(), len);

	if start == len {
		return Ok(IoStatus::Transferred(0));
	}

	loop {
		let result = sys.read(fd, &mut window.get_mut().as_mut()[start..]);

		match result {
			Ok(0) => return Ok(IoStatus::Eof),
			Ok(n) => {
				window.set_position((start + n) as u64);
				return Ok(IoStatus::Transferred(n));
			},
			Err(error) if error.kind() == io::ErrorKind::Interrupted => {
				tracing::trace!(fd, "read interrupted; retrying");
			},
			Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(IoStatus::WouldBlock),
			Err(error) => return Err(error.into()),
		}
	}
}

/// Writes the remaining part of `window`, advancing its position by the number of bytes written.
///
/// On a partial write, only the written prefix is consumed. Otherwise this behaves like [`read()`].
pub fn write<S, B>(sys: &S, fd: RawFd, window: &mut Cursor<B>) -> Result<IoStatus, SocketError>
where
	S: Syscalls + ?Sized,
	B: AsRef<[u8]>,
{
	let len = window.get_ref().as_ref().len();
	let start = window_start(window.position(), len);

	if start == len {
		return Ok(IoStatus::Transferred(0));
	}

	loop {
		match sys.write(fd, &window.get_ref().as_ref()[start..]) {
			Ok(n) => {
				window.set_position((start + n) as u64);
				return Ok(IoStatus::Transferred(n));
			},
			Err(error) if error.kind() == io::ErrorKind::Interrupted => {
				tracing::trace!(fd, "write interrupted; retrying");
			},
			Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(IoStatus::WouldBlock),
			Err(error) => return Err(error.into()),
		}
	}
}

fn window_starts<B, F>(windows: &mut [Cursor<B>], len_of: F) -> Vec<(usize, usize)>
where
	F: Fn(&mut B) -> usize,
{
	windows.iter_mut()
	.map(|window| {
		let len = len_of(window.get_mut());
		(window_start(window.position(), len), len)
	})
	.collect()
}

fn advance_windows<B>(windows: &mut [Cursor<B>], bounds: &[(usize, usize)], mut n: usize) {
	for (window, &(start, len)) in windows.iter_mut().zip(bounds) {
		let taken = n.min(len - start);
		window.set_position((start + taken) as u64);
		n -= taken;
	}
}

/// Scattering read: fills the unfilled parts of `windows` in order, with a single system call, advancing each window's position by what it received.
///
/// The returned count is the total over all windows. Otherwise this behaves like [`read()`].
pub fn read_many<S, B>(sys: &S, fd: RawFd, windows: &mut [Cursor<B>]) -> Result<IoStatus, SocketError>
where
	S: Syscalls + ?Sized,
	B: AsMut<[u8]>,
{
	let bounds = window_starts(windows, |buf| <B as AsMut<[u8]>>::as_mut(buf).len());

	if bounds.iter().all(|(start, len)| start == len) {
		return Ok(IoStatus::Transferred(0));
	}

	loop {
		let result = {
			let mut slices: Vec<IoSliceMut<'_>> =
				windows.iter_mut()
				.zip(&bounds)
				.map(|(window, &(start, _))| IoSliceMut::new(&mut window.get_mut().as_mut()[start..]))
				.collect();

			sys.read_vectored(fd, &mut slices)
		};

		match result {
			Ok(0) => return Ok(IoStatus::Eof),
			Ok(n) => {
				advance_windows(windows, &bounds, n);
				return Ok(IoStatus::Transferred(n));
			},
			Err(error) if error.kind() == io::ErrorKind::Interrupted => {
				tracing::trace!(fd, "scattering read interrupted; retrying");
			},
			Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(IoStatus::WouldBlock),
			Err(error) => return Err(error.into()),
		}
	}
}

/// Gathering write: sends the remaining parts of `windows` in order, with a single system call, advancing each window's position by what was taken from it.
pub fn write_many<S, B>(sys: &S, fd: RawFd, windows: &mut [Cursor<B>]) -> Result<IoStatus, SocketError>
where
	S: Syscalls + ?Sized,
	B: AsRef<[u8]>,
{
	let bounds = window_starts(windows, |buf| <B as AsRef<[u8]>>::as_ref(buf).len());

	if bounds.iter().all(|(start, len)| start == len) {
		return Ok(IoStatus::Transferred(0));
	}

	loop {
		let result = {
			let slices: Vec<IoSlice<'_>> =
				windows.iter()
				.zip(&bounds)
				.map(|(window, &(start, _))| IoSlice::new(&window.get_ref().as_ref()[start..]))
				.collect();

			sys.write_vectored(fd, &slices)
		};

		match result {
			Ok(n) => {
				advance_windows(windows, &bounds, n);
				return Ok(IoStatus::Transferred(n));
			},
			Err(error) if error.kind() == io::ErrorKind::Interrupted => {
				tracing::trace!(fd, "gathering write interrupted; retrying");
			},
			Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(IoStatus::WouldBlock),
			Err(error) => return Err(error.into()),
		}
	}
}

/// Starts or continues connecting the socket to `addr`.
///
/// `EINPROGRESS`, `EALREADY`, and `EAGAIN` all mean the connection is still being established.
pub fn connect<S>(sys: &S, fd: RawFd, addr: &SockAddrUn) -> Result<ConnectStatus, SocketError>
where
	S: Syscalls + ?Sized,
{
	match sys.connect(fd, addr) {
		Ok(()) => Ok(ConnectStatus::Connected),
		Err(error) => match error.raw_os_error() {
			Some(libc::EINPROGRESS | libc::EALREADY | libc::EAGAIN) => Ok(ConnectStatus::InProgress),
			Some(libc::EINTR) => Ok(ConnectStatus::Interrupted),
			_ => Err(error.into()),
		},
	}
}

/// Binds the socket to `addr`.
pub fn bind<S>(sys: &S, fd: RawFd, addr: &SockAddrUn) -> Result<(), SocketError>
where
	S: Syscalls + ?Sized,
{
	Ok(sys.bind(fd, addr)?)
}

/// Closes the descriptor. Interrupted calls are retried; any other failure is returned.
pub fn close<S>(sys: &S, fd: RawFd) -> Result<(), SocketError>
where
	S: Syscalls + ?Sized,
{
	loop {
		match sys.close(fd) {
			Ok(()) => return Ok(()),
			Err(error) if error.kind() == io::ErrorKind::Interrupted => {
				tracing::trace!(fd, "close interrupted; retrying");
			},
			Err(error) => return Err(error.into()),
		}
	}
}

/// Switches the descriptor between blocking and non-blocking mode.
pub fn set_blocking<S>(sys: &S, fd: RawFd, blocking: bool) -> Result<(), SocketError>
where
	S: Syscalls + ?Sized,
{
	Ok(sys.set_nonblocking(fd, !blocking)?)
}

/// Waits up to `timeout_ms` milliseconds for any of `events`. A negative timeout waits indefinitely.
pub fn poll<S>(sys: &S, fd: RawFd, events: c_short, timeout_ms: c_int) -> Result<PollStatus, SocketError>
where
	S: Syscalls + ?Sized,
{
	match sys.poll(fd, events, timeout_ms) {
		Ok(0) => Ok(PollStatus::TimedOut),
		Ok(revents) => Ok(PollStatus::Ready(revents)),
		Err(error) if error.kind() == io::ErrorKind::Interrupted => Ok(PollStatus::Interrupted),
		Err(error) => Err(error.into()),
	}
}

/// Shuts down one or both directions of the connection.
pub fn shutdown<S>(sys: &S, fd: RawFd, how: Shutdown) -> Result<(), SocketError>
where
	S: Syscalls + ?Sized,
{
	Ok(sys.shutdown(fd, how)?)
}

/// The address the socket is bound to.
pub fn local_addr<S>(sys: &S, fd: RawFd) -> Result<SockAddrUn, SocketError>
where
	S: Syscalls + ?Sized,
{
	Ok(sys.local_addr(fd)?)
}

/// The address of the connected peer.
pub fn peer_addr<S>(sys: &S, fd: RawFd) -> Result<SockAddrUn, SocketError>
where
	S: Syscalls + ?Sized,
{
	Ok(sys.peer_addr(fd)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		errors::SocketErrorKind,
		testing::FakeSyscalls,
	};
	use assert_matches::assert_matches;

	#[test]
	fn read_advances_window() {
		let sys = FakeSyscalls::default();
		sys.push_read(Ok(vec![1, 2, 3]));

		let mut window = Cursor::new([0u8; 8]);
		window.set_position(2);

		assert_eq!(read(&sys, 3, &mut window).unwrap(), IoStatus::Transferred(3));
		assert_eq!(window.position(), 5);
		assert_eq!(&window.get_ref()[..5], &[0, 0, 1, 2, 3]);
	}

	#[test]
	fn read_retries_interrupted_calls() {
		let sys = FakeSyscalls::default();
		sys.push_read(Err(libc::EINTR));
		sys.push_read(Err(libc::EINTR));
		sys.push_read(Ok(vec![9]));

		let mut window = Cursor::new(vec![0u8; 4]);
		assert_eq!(read(&sys, 3, &mut window).unwrap(), IoStatus::Transferred(1));
		assert_eq!(sys.calls("read"), 3);
	}

	#[test]
	fn read_would_block_and_eof() {
		let sys = FakeSyscalls::default();
		sys.push_read(Err(libc::EAGAIN));
		sys.push_read(Ok(vec![]));

		let mut window = Cursor::new([0u8; 4]);
		assert_eq!(read(&sys, 3, &mut window).unwrap(), IoStatus::WouldBlock);
		assert_eq!(window.position(), 0);
		assert_eq!(read(&sys, 3, &mut window).unwrap(), IoStatus::Eof);
		assert_eq!(window.position(), 0);
	}

	#[test]
	fn read_empty_window_skips_syscall() {
		let sys = FakeSyscalls::default();
		let mut window = Cursor::new([0u8; 4]);
		window.set_position(4);

		assert_eq!(read(&sys, 3, &mut window).unwrap(), IoStatus::Transferred(0));
		assert_eq!(sys.calls("read"), 0);
	}

	#[test]
	fn read_error_keeps_os_code() {
		let sys = FakeSyscalls::default();
		sys.push_read(Err(libc::ECONNRESET));

		let mut window = Cursor::new([0u8; 4]);
		let error = read(&sys, 3, &mut window).unwrap_err();
		assert_eq!(error.raw_os_error(), Some(libc::ECONNRESET));
		assert_eq!(error.kind, SocketErrorKind::Other);
	}

	#[test]
	fn write_consumes_only_written_prefix() {
		let sys = FakeSyscalls::default();
		sys.push_write(Ok(2));
		sys.push_write(Err(libc::EWOULDBLOCK));

		let mut window = Cursor::new(&b"hello"[..]);
		assert_eq!(write(&sys, 3, &mut window).unwrap(), IoStatus::Transferred(2));
		assert_eq!(window.position(), 2);

		assert_eq!(write(&sys, 3, &mut window).unwrap(), IoStatus::WouldBlock);
		assert_eq!(window.position(), 2);
		assert_eq!(sys.written(), b"he");
	}

	#[test]
	fn scattering_read_fills_windows_in_order() {
		let sys = FakeSyscalls::default();
		sys.push_read(Ok(vec![1, 2, 3, 4, 5]));

		let mut windows = [Cursor::new(vec![0u8; 2]), Cursor::new(vec![0u8; 2]), Cursor::new(vec![0u8; 4])];
		windows[1].set_position(1);

		assert_eq!(read_many(&sys, 3, &mut windows).unwrap(), IoStatus::Transferred(5));
		assert_eq!(windows[0].get_ref()[..], [1, 2]);
		assert_eq!(windows[1].get_ref()[..], [0, 3]);
		assert_eq!(windows[2].get_ref()[..2], [4, 5]);
		assert_eq!(windows.map(|window| window.position()), [2, 2, 2]);
	}

	#[test]
	fn gathering_write_partial() {
		let sys = FakeSyscalls::default();
		sys.push_write(Ok(3));

		let mut windows = [Cursor::new(&b"ab"[..]), Cursor::new(&b"cd"[..])];
		assert_eq!(write_many(&sys, 3, &mut windows).unwrap(), IoStatus::Transferred(3));
		assert_eq!(windows[0].position(), 2);
		assert_eq!(windows[1].position(), 1);
		assert_eq!(sys.written(), b"abc");
	}

	#[test]
	fn connect_outcomes() {
		let sys = FakeSyscalls::default();
		let addr = SockAddrUn::empty();

		sys.push_connect(Ok(()));
		assert_eq!(connect(&sys, 3, &addr).unwrap(), ConnectStatus::Connected);

		for code in [libc::EINPROGRESS, libc::EALREADY, libc::EAGAIN] {
			sys.push_connect(Err(code));
			assert_eq!(connect(&sys, 3, &addr).unwrap(), ConnectStatus::InProgress);
		}

		sys.push_connect(Err(libc::EINTR));
		assert_eq!(connect(&sys, 3, &addr).unwrap(), ConnectStatus::Interrupted);

		sys.push_connect(Err(libc::ECONNREFUSED));
		assert_matches!(
			connect(&sys, 3, &addr),
			Err(SocketError { kind: SocketErrorKind::ConnectionRefused, .. })
		);
	}

	#[test]
	fn close_retries_interrupted_and_reports_failure() {
		let sys = FakeSyscalls::default();
		sys.push_close(Err(libc::EINTR));
		close(&sys, 3).unwrap();
		assert_eq!(sys.calls("close"), 2);

		sys.push_close(Err(libc::EIO));
		let error = close(&sys, 3).unwrap_err();
		assert_eq!(error.raw_os_error(), Some(libc::EIO));
	}

	#[test]
	fn poll_outcomes() {
		let sys = FakeSyscalls::default();

		sys.push_poll(Ok(0));
		assert_eq!(poll(&sys, 3, libc::POLLIN, 10).unwrap(), PollStatus::TimedOut);

		sys.push_poll(Ok(libc::POLLIN));
		assert_eq!(poll(&sys, 3, libc::POLLIN, 10).unwrap(), PollStatus::Ready(libc::POLLIN));

		sys.push_poll(Err(libc::EINTR));
		assert_eq!(poll(&sys, 3, libc::POLLIN, 10).unwrap(), PollStatus::Interrupted);
	}
}
