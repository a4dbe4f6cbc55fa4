use nix::unistd::{Gid, Pid, Uid};
use std::fmt::{self, Display, Formatter};

#[cfg(doc)]
use crate::{
	SoPeerCred,
	UnixChannel,
};

/// The identity of the process at the other end of a connected Unix-domain socket.
///
/// This is a snapshot taken when [`UnixChannel::credentials`] (or [`UnixChannel::get_option`] with [`SoPeerCred`]) was called. On Linux, the kernel records the peer's credentials when the connection is established, so they describe the process that called `connect` or `listen`, not necessarily the process that currently holds the socket.
///
///
/// # Availability
///
/// Linux and Android. Querying credentials on other platforms fails with an unsupported-option error.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Credentials {
	pid: Pid,
	uid: Uid,
	gid: Gid,
}

impl Credentials {
	/// Assembles credentials from their parts.
	pub fn new(pid: Pid, uid: Uid, gid: Gid) -> Self {
		Self { pid, uid, gid }
	}

	/// The peer's process ID.
	pub fn pid(&self) -> Pid {
		self.pid
	}

	/// The peer's effective user ID.
	pub fn uid(&self) -> Uid {
		self.uid
	}

	/// The peer's effective group ID.
	pub fn gid(&self) -> Gid {
		self.gid
	}
}

impl Display for Credentials {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "[uid={} gid={} pid={}]", self.uid, self.gid, self.pid)
	}
}

#[cfg(any(target_os = "android", target_os = "linux"))]
impl From<libc::ucred> for Credentials {
	fn from(ucred: libc::ucred) -> Self {
		Self {
			pid: Pid::from_raw(ucred.pid),
			uid: Uid::from_raw(ucred.uid),
			gid: Gid::from_raw(ucred.gid),
		}
	}
}

#[test]
fn test_display() {
	let credentials = Credentials::new(
		Pid::from_raw(4242),
		Uid::from_raw(1000),
		Gid::from_raw(100),
	);

	assert_eq!(credentials.to_string(), "[uid=1000 gid=100 pid=4242]");
}
