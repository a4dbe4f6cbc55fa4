use crate::{
	addr::SockAddrUn,
	NativeThread,
	OptionPayload,
	PayloadKind,
	Syscalls,
};
use nix::errno::Errno;
use once_cell::sync::Lazy;
use std::{
	ffi::{c_int, c_short, c_void},
	io::{self, IoSlice, IoSliceMut},
	mem,
	net::Shutdown,
	os::fd::{IntoRawFd, RawFd},
	ptr,
	time::Duration,
};

/// The real [`Syscalls`], calling straight into the C library.
///
/// The first time a thread blocked on a closed channel has to be interrupted, a handler that does nothing is installed for the wake-up signal: `SIGRTMAX - 2` on Linux and Android, `SIGIO` elsewhere. Applications should leave that signal alone.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PosixSyscalls;

/// Reads a socket option into a value of type `T`.
///
/// # Safety
///
/// `T` must be plain old data of the type that the kernel writes for this option.
unsafe fn getsockopt_raw<T>(fd: RawFd, level: c_int, name: c_int) -> io::Result<T> {
	let mut value: T = mem::zeroed();
	let mut len = mem::size_of::<T>() as libc::socklen_t;

	Errno::result(libc::getsockopt(
		fd,
		level,
		name,
		&mut value as *mut T as *mut c_void,
		&mut len,
	))?;

	Ok(value)
}

/// Writes a socket option from a value of type `T`.
///
/// # Safety
///
/// `T` must be plain old data of the type that the kernel expects for this option.
unsafe fn setsockopt_raw<T>(fd: RawFd, level: c_int, name: c_int, value: &T) -> io::Result<()> {
	Errno::result(libc::setsockopt(
		fd,
		level,
		name,
		value as *const T as *const c_void,
		mem::size_of::<T>() as libc::socklen_t,
	))?;

	Ok(())
}

cfg_if::cfg_if! {
	if #[cfg(any(target_os = "android", target_os = "linux"))] {
		/// The signal used to interrupt threads blocked on a closed channel.
		fn wakeup_signal() -> c_int {
			libc::SIGRTMAX() - 2
		}
	}
	else {
		/// The signal used to interrupt threads blocked on a closed channel.
		fn wakeup_signal() -> c_int {
			libc::SIGIO
		}
	}
}

extern "C" fn on_wakeup_signal(_signal: c_int) {}

/// Installs a handler for [`wakeup_signal`] that does nothing. It is installed without `SA_RESTART`, so the signal makes blocking calls fail with `EINTR` instead of restarting them.
static WAKEUP_HANDLER: Lazy<Result<(), Errno>> = Lazy::new(|| {
	// Safety: an all-zero `sigaction` is valid, and the handler is async-signal-safe because it does nothing.
	unsafe {
		let mut action: libc::sigaction = mem::zeroed();
		action.sa_sigaction = on_wakeup_signal as extern "C" fn(c_int) as libc::sighandler_t;
		action.sa_flags = 0;
		libc::sigemptyset(&mut action.sa_mask);

		Errno::result(libc::sigaction(wakeup_signal(), &action, ptr::null_mut()))?;
	}

	tracing::debug!(signal = wakeup_signal(), "installed channel wake-up signal handler");
	Ok(())
});

fn shutdown_how(how: Shutdown) -> c_int {
	match how {
		Shutdown::Read => libc::SHUT_RD,
		Shutdown::Write => libc::SHUT_WR,
		Shutdown::Both => libc::SHUT_RDWR,
	}
}

impl Syscalls for PosixSyscalls {
	fn socket(&self, r#type: socket2::Type) -> io::Result<RawFd> {
		let socket = socket2::Socket::new(socket2::Domain::UNIX, r#type, None)?;
		Ok(socket.into_raw_fd())
	}

	fn read(&self, fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
		// Safety: the pointer and length describe `buf`, which is valid for writes.
		let n = Errno::result(unsafe {
			libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len())
		})?;

		Ok(n as usize)
	}

	fn write(&self, fd: RawFd, buf: &[u8]) -> io::Result<usize> {
		// Safety: the pointer and length describe `buf`, which is valid for reads.
		let n = Errno::result(unsafe {
			libc::write(fd, buf.as_ptr() as *const c_void, buf.len())
		})?;

		Ok(n as usize)
	}

	fn read_vectored(&self, fd: RawFd, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
		let count = c_int::try_from(bufs.len()).unwrap_or(c_int::MAX);

		// Safety: `IoSliceMut` is ABI-compatible with `struct iovec`.
		let n = Errno::result(unsafe {
			libc::readv(fd, bufs.as_mut_ptr() as *const libc::iovec, count)
		})?;

		Ok(n as usize)
	}

	fn write_vectored(&self, fd: RawFd, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
		let count = c_int::try_from(bufs.len()).unwrap_or(c_int::MAX);

		// Safety: `IoSlice` is ABI-compatible with `struct iovec`.
		let n = Errno::result(unsafe {
			libc::writev(fd, bufs.as_ptr() as *const libc::iovec, count)
		})?;

		Ok(n as usize)
	}

	fn close(&self, fd: RawFd) -> io::Result<()> {
		// Safety: the caller owns `fd` and never uses it again after a successful close.
		Errno::result(unsafe { libc::close(fd) })?;
		Ok(())
	}

	fn pre_close(&self, fd: RawFd) -> io::Result<()> {
		// Shutting down both directions makes blocked `read` and `write` calls on other threads return, without releasing the descriptor number for reuse.
		match Errno::result(unsafe { libc::shutdown(fd, libc::SHUT_RDWR) }) {
			Ok(_) | Err(Errno::ENOTCONN) => Ok(()),
			Err(error) => Err(error.into()),
		}
	}

	fn signal(&self, thread: NativeThread) -> io::Result<()> {
		(*WAKEUP_HANDLER)?;

		// Safety: channels only signal threads that are still recorded as inside one of their operations, so the thread has not exited.
		match unsafe { libc::pthread_kill(thread.as_raw(), wakeup_signal()) } {
			0 => Ok(()),
			code => Err(io::Error::from_raw_os_error(code)),
		}
	}

	fn set_nonblocking(&self, fd: RawFd, nonblocking: bool) -> io::Result<()> {
		let flags = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;

		let new_flags = match nonblocking {
			true => flags | libc::O_NONBLOCK,
			false => flags & !libc::O_NONBLOCK,
		};

		if new_flags != flags {
			Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFL, new_flags) })?;
		}

		Ok(())
	}

	fn connect(&self, fd: RawFd, addr: &SockAddrUn) -> io::Result<()> {
		Errno::result(unsafe { libc::connect(fd, addr.as_ptr(), addr.len()) })?;
		Ok(())
	}

	fn bind(&self, fd: RawFd, addr: &SockAddrUn) -> io::Result<()> {
		Errno::result(unsafe { libc::bind(fd, addr.as_ptr(), addr.len()) })?;
		Ok(())
	}

	fn local_addr(&self, fd: RawFd) -> io::Result<SockAddrUn> {
		let mut addr = SockAddrUn::empty();
		let (ptr, len) = addr.as_mut_parts();
		Errno::result(unsafe { libc::getsockname(fd, ptr, len) })?;
		Ok(addr)
	}

	fn peer_addr(&self, fd: RawFd) -> io::Result<SockAddrUn> {
		let mut addr = SockAddrUn::empty();
		let (ptr, len) = addr.as_mut_parts();
		Errno::result(unsafe { libc::getpeername(fd, ptr, len) })?;
		Ok(addr)
	}

	fn poll(&self, fd: RawFd, events: c_short, timeout_ms: c_int) -> io::Result<c_short> {
		let mut pollfd = libc::pollfd {
			fd,
			events,
			revents: 0,
		};

		let ready = Errno::result(unsafe { libc::poll(&mut pollfd, 1, timeout_ms) })?;

		Ok(match ready {
			0 => 0,
			_ => pollfd.revents,
		})
	}

	fn shutdown(&self, fd: RawFd, how: Shutdown) -> io::Result<()> {
		Errno::result(unsafe { libc::shutdown(fd, shutdown_how(how)) })?;
		Ok(())
	}

	fn getsockopt(&self, fd: RawFd, level: c_int, name: c_int, kind: PayloadKind) -> io::Result<OptionPayload> {
		// Safety: each arm reads the C type that the kernel uses for that form of option.
		unsafe {
			Ok(match kind {
				PayloadKind::Int => OptionPayload::Int(getsockopt_raw::<c_int>(fd, level, name)?),

				PayloadKind::Byte => OptionPayload::Byte(getsockopt_raw::<u8>(fd, level, name)?),

				PayloadKind::Linger => {
					let linger = getsockopt_raw::<libc::linger>(fd, level, name)?;
					OptionPayload::Linger((linger.l_onoff != 0).then_some(linger.l_linger))
				},

				PayloadKind::Timeval => {
					let tv = getsockopt_raw::<libc::timeval>(fd, level, name)?;
					OptionPayload::Timeval(
						Duration::from_secs(tv.tv_sec.max(0) as u64)
						+ Duration::from_micros(tv.tv_usec.max(0) as u64)
					)
				},

				#[cfg(any(target_os = "android", target_os = "linux"))]
				PayloadKind::Credentials => {
					let ucred = getsockopt_raw::<libc::ucred>(fd, level, name)?;
					OptionPayload::Credentials(ucred.into())
				},

				#[cfg(not(any(target_os = "android", target_os = "linux")))]
				PayloadKind::Credentials => return Err(Errno::ENOPROTOOPT.into()),
			})
		}
	}

	fn setsockopt(&self, fd: RawFd, level: c_int, name: c_int, payload: &OptionPayload) -> io::Result<()> {
		// Safety: as with `getsockopt`.
		unsafe {
			match payload {
				OptionPayload::Int(value) => setsockopt_raw(fd, level, name, value),

				OptionPayload::Byte(value) => setsockopt_raw(fd, level, name, value),

				OptionPayload::Linger(seconds) => {
					let linger = libc::linger {
						l_onoff: seconds.is_some().into(),
						l_linger: seconds.unwrap_or(0),
					};
					setsockopt_raw(fd, level, name, &linger)
				},

				OptionPayload::Timeval(timeout) => {
					let tv = libc::timeval {
						tv_sec: timeout.as_secs() as libc::time_t,
						tv_usec: timeout.subsec_micros() as libc::suseconds_t,
					};
					setsockopt_raw(fd, level, name, &tv)
				},

				OptionPayload::Credentials(_) => Err(Errno::ENOPROTOOPT.into()),
			}
		}
	}
}

#[test]
fn test_socket_pair_io() {
	use crate::syscall;
	use std::io::Cursor;

	let (a, b) = socket2::Socket::pair(socket2::Domain::UNIX, socket2::Type::STREAM, None).unwrap();
	let (a, b) = (a.into_raw_fd(), b.into_raw_fd());
	let sys = PosixSyscalls;

	let mut out = Cursor::new(&[1u8, 2, 3][..]);
	assert_eq!(syscall::write(&sys, a, &mut out).unwrap(), syscall::IoStatus::Transferred(3));

	let mut input = Cursor::new([0u8; 8]);
	assert_eq!(syscall::read(&sys, b, &mut input).unwrap(), syscall::IoStatus::Transferred(3));
	assert_eq!(&input.get_ref()[..3], &[1, 2, 3]);

	sys.set_nonblocking(b, true).unwrap();
	assert_eq!(syscall::read(&sys, b, &mut input).unwrap(), syscall::IoStatus::WouldBlock);

	sys.shutdown(a, Shutdown::Write).unwrap();
	assert_eq!(syscall::read(&sys, b, &mut input).unwrap(), syscall::IoStatus::Eof);

	syscall::close(&sys, a).unwrap();
	syscall::close(&sys, b).unwrap();
}

#[test]
fn test_option_payloads() {
	let fd = PosixSyscalls.socket(socket2::Type::STREAM).unwrap();

	PosixSyscalls.setsockopt(fd, libc::SOL_SOCKET, libc::SO_LINGER, &OptionPayload::Linger(Some(7))).unwrap();
	assert_eq!(
		PosixSyscalls.getsockopt(fd, libc::SOL_SOCKET, libc::SO_LINGER, PayloadKind::Linger).unwrap(),
		OptionPayload::Linger(Some(7)),
	);

	PosixSyscalls.setsockopt(fd, libc::SOL_SOCKET, libc::SO_RCVTIMEO, &OptionPayload::Timeval(Duration::from_secs(2))).unwrap();
	assert_eq!(
		PosixSyscalls.getsockopt(fd, libc::SOL_SOCKET, libc::SO_RCVTIMEO, PayloadKind::Timeval).unwrap(),
		OptionPayload::Timeval(Duration::from_secs(2)),
	);

	PosixSyscalls.close(fd).unwrap();
}

#[test]
fn test_signal_interrupts_poll() {
	use std::{
		os::fd::AsRawFd,
		sync::mpsc,
		thread,
	};

	let (_a, b) = socket2::Socket::pair(socket2::Domain::UNIX, socket2::Type::STREAM, None).unwrap();
	let fd = b.as_raw_fd();

	let (thread_tx, thread_rx) = mpsc::channel();
	let (result_tx, result_rx) = mpsc::channel();
	let (done_tx, done_rx) = mpsc::channel::<()>();

	let waiter = thread::spawn(move || {
		thread_tx.send(NativeThread::current()).unwrap();
		result_tx.send(PosixSyscalls.poll(fd, libc::POLLIN, -1)).unwrap();

		// Stay alive until signalling has stopped.
		let _ = done_rx.recv();
	});

	let thread = thread_rx.recv().unwrap();

	let result = loop {
		PosixSyscalls.signal(thread).unwrap();

		match result_rx.recv_timeout(Duration::from_millis(10)) {
			Ok(result) => break result,
			Err(mpsc::RecvTimeoutError::Timeout) => continue,
			Err(error) => panic!("{error}"),
		}
	};

	done_tx.send(()).unwrap();
	waiter.join().unwrap();

	assert_eq!(result.unwrap_err().kind(), io::ErrorKind::Interrupted);
}
