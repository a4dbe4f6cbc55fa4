//! A scripted [`Syscalls`] implementation for unit tests.

use crate::{
	addr::SockAddrUn,
	syscall::NativeThread,
	Credentials,
	OptionPayload,
	PayloadKind,
	Syscalls,
	UnixSocketAddr,
};
use nix::unistd::{getgid, getuid, Pid};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
	collections::{HashMap, HashSet, VecDeque},
	ffi::{c_int, c_short},
	io::{self, IoSlice, IoSliceMut},
	net::Shutdown,
	os::fd::RawFd,
	sync::Arc,
	time::Duration,
};

/// Each scripted result is either a value or a raw OS error code.
type Scripted<T> = Result<T, c_int>;

#[derive(Default)]
struct State {
	calls: HashMap<&'static str, usize>,
	next_fd: RawFd,
	reads: VecDeque<Scripted<Vec<u8>>>,
	writes: VecDeque<Scripted<usize>>,
	written: Vec<u8>,
	connects: VecDeque<Scripted<()>>,
	binds: VecDeque<Scripted<()>>,
	closes: VecDeque<Scripted<()>>,
	polls: VecDeque<Scripted<c_short>>,
	bound: Option<SockAddrUn>,
	peer: Option<SockAddrUn>,
	options: HashMap<(c_int, c_int), OptionPayload>,
	blocked: HashSet<&'static str>,
	shut_down: bool,
	signalled: bool,
}

impl State {
	/// Whether a blocked call of the given kind has been woken. Shutting the socket down wakes reads and writes; only a signal wakes anything else.
	fn woken(&self, call: &str) -> bool {
		match call {
			"read" | "write" => self.shut_down,
			_ => self.signalled,
		}
	}
}

/// Counts every call, echoes socket options back, and plays back scripted results. Unscripted calls succeed, except reads, which would block.
///
/// Calls can also be made to [block][Self::block] until the channel wakes them, the way a closing channel has to.
#[derive(Clone, Default)]
pub(crate) struct FakeSyscalls {
	state: Arc<Mutex<State>>,
	wake: Arc<Condvar>,
}

impl FakeSyscalls {
	fn record(&self, name: &'static str) -> MutexGuard<'_, State> {
		let mut state = self.state.lock();
		*state.calls.entry(name).or_default() += 1;
		state
	}

	/// Waits until the named call is woken, if it was made to block. Returns whether it blocked.
	fn wait_if_blocked(&self, state: &mut MutexGuard<'_, State>, call: &'static str) -> bool {
		if !state.blocked.contains(call) {
			return false;
		}

		while !state.woken(call) {
			self.wake.wait(state);
		}

		true
	}

	fn scripted<T>(script: Option<Scripted<T>>, default: T) -> io::Result<T> {
		match script {
			None => Ok(default),
			Some(Ok(value)) => Ok(value),
			Some(Err(code)) => Err(io::Error::from_raw_os_error(code)),
		}
	}

	/// How many times the named method was called.
	pub fn calls(&self, name: &str) -> usize {
		self.state.lock().calls.get(name).copied().unwrap_or(0)
	}

	/// Total number of calls to any method.
	pub fn total_calls(&self) -> usize {
		self.state.lock().calls.values().sum()
	}

	pub fn push_read(&self, result: Scripted<Vec<u8>>) {
		self.state.lock().reads.push_back(result);
	}

	pub fn push_write(&self, result: Scripted<usize>) {
		self.state.lock().writes.push_back(result);
	}

	pub fn push_connect(&self, result: Scripted<()>) {
		self.state.lock().connects.push_back(result);
	}

	pub fn push_bind(&self, result: Scripted<()>) {
		self.state.lock().binds.push_back(result);
	}

	pub fn push_close(&self, result: Scripted<()>) {
		self.state.lock().closes.push_back(result);
	}

	pub fn push_poll(&self, result: Scripted<c_short>) {
		self.state.lock().polls.push_back(result);
	}

	/// Makes the named call (`read`, `write`, `connect`, or `poll`) block until it is woken.
	///
	/// Reads and writes are woken by `pre_close`. `connect` and `poll` are only woken by `signal`. Once woken, reads report end of stream, writes fail with `EPIPE`, `poll` fails with `EINTR`, and `connect` returns its scripted result.
	pub fn block(&self, call: &'static str) {
		self.state.lock().blocked.insert(call);
	}

	/// Everything successfully written so far.
	pub fn written(&self) -> Vec<u8> {
		self.state.lock().written.clone()
	}

	/// Waits until some thread has entered the named call.
	pub fn wait_for_call(&self, name: &str) {
		while self.calls(name) == 0 {
			std::thread::sleep(Duration::from_millis(1));
		}
	}
}

impl Syscalls for FakeSyscalls {
	fn socket(&self, _type: socket2::Type) -> io::Result<RawFd> {
		let mut state = self.record("socket");
		state.next_fd += 1;
		Ok(100 + state.next_fd)
	}

	fn read(&self, _fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
		let mut state = self.record("read");

		match state.reads.pop_front() {
			Some(Ok(data)) => {
				let n = data.len().min(buf.len());
				buf[..n].copy_from_slice(&data[..n]);
				Ok(n)
			},
			Some(Err(code)) => Err(io::Error::from_raw_os_error(code)),
			None if self.wait_if_blocked(&mut state, "read") => Ok(0),
			None => Err(io::Error::from_raw_os_error(libc::EAGAIN)),
		}
	}

	fn write(&self, _fd: RawFd, buf: &[u8]) -> io::Result<usize> {
		let mut state = self.record("write");

		if self.wait_if_blocked(&mut state, "write") {
			return Err(io::Error::from_raw_os_error(libc::EPIPE));
		}

		let script = state.writes.pop_front();
		let n = Self::scripted(script, buf.len())?.min(buf.len());
		state.written.extend_from_slice(&buf[..n]);
		Ok(n)
	}

	fn read_vectored(&self, fd: RawFd, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
		let mut scratch = vec![0u8; bufs.iter().map(|buf| buf.len()).sum()];
		let n = self.read(fd, &mut scratch)?;

		let mut data = &scratch[..n];
		for buf in bufs.iter_mut() {
			let taken = data.len().min(buf.len());
			buf[..taken].copy_from_slice(&data[..taken]);
			data = &data[taken..];
		}

		Ok(n)
	}

	fn write_vectored(&self, fd: RawFd, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
		let joined: Vec<u8> = bufs.iter().flat_map(|buf| buf.iter().copied()).collect();
		self.write(fd, &joined)
	}

	fn close(&self, _fd: RawFd) -> io::Result<()> {
		let mut state = self.record("close");
		let script = state.closes.pop_front();
		Self::scripted(script, ())
	}

	fn pre_close(&self, _fd: RawFd) -> io::Result<()> {
		let mut state = self.record("pre_close");
		state.shut_down = true;
		self.wake.notify_all();
		Ok(())
	}

	fn signal(&self, _thread: NativeThread) -> io::Result<()> {
		let mut state = self.record("signal");
		state.signalled = true;
		self.wake.notify_all();
		Ok(())
	}

	fn set_nonblocking(&self, _fd: RawFd, _nonblocking: bool) -> io::Result<()> {
		let _state = self.record("set_nonblocking");
		Ok(())
	}

	fn connect(&self, _fd: RawFd, addr: &SockAddrUn) -> io::Result<()> {
		let mut state = self.record("connect");
		self.wait_if_blocked(&mut state, "connect");
		let script = state.connects.pop_front();
		let result = Self::scripted(script, ());
		state.peer = Some(*addr);
		result
	}

	fn bind(&self, _fd: RawFd, addr: &SockAddrUn) -> io::Result<()> {
		let mut state = self.record("bind");
		let script = state.binds.pop_front();
		Self::scripted(script, ())?;
		state.bound = Some(*addr);
		Ok(())
	}

	fn local_addr(&self, _fd: RawFd) -> io::Result<SockAddrUn> {
		let state = self.record("local_addr");
		match state.bound {
			Some(bound) => Ok(bound),
			None => Ok(SockAddrUn::new(&UnixSocketAddr::unnamed()).unwrap()),
		}
	}

	fn peer_addr(&self, _fd: RawFd) -> io::Result<SockAddrUn> {
		let state = self.record("peer_addr");
		state.peer.ok_or_else(|| io::Error::from_raw_os_error(libc::ENOTCONN))
	}

	fn poll(&self, _fd: RawFd, events: c_short, _timeout_ms: c_int) -> io::Result<c_short> {
		let mut state = self.record("poll");

		if self.wait_if_blocked(&mut state, "poll") {
			return Err(io::Error::from_raw_os_error(libc::EINTR));
		}

		let script = state.polls.pop_front();
		Self::scripted(script, events)
	}

	fn shutdown(&self, _fd: RawFd, _how: Shutdown) -> io::Result<()> {
		let _state = self.record("shutdown");
		Ok(())
	}

	fn getsockopt(&self, _fd: RawFd, level: c_int, name: c_int, kind: PayloadKind) -> io::Result<OptionPayload> {
		let state = self.record("getsockopt");

		if let Some(payload) = state.options.get(&(level, name)) {
			return Ok(*payload);
		}

		Ok(match kind {
			PayloadKind::Int => OptionPayload::Int(0),
			PayloadKind::Byte => OptionPayload::Byte(0),
			PayloadKind::Linger => OptionPayload::Linger(None),
			PayloadKind::Timeval => OptionPayload::Timeval(Duration::ZERO),
			PayloadKind::Credentials => OptionPayload::Credentials(Credentials::new(Pid::this(), getuid(), getgid())),
		})
	}

	fn setsockopt(&self, _fd: RawFd, level: c_int, name: c_int, payload: &OptionPayload) -> io::Result<()> {
		let mut state = self.record("setsockopt");
		state.options.insert((level, name), *payload);
		Ok(())
	}
}
