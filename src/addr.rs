use crate::errors::{
	ChannelError,
	CleanupSocketError,
	InvalidUnixSocketAddrError,
};
use cfg_if::cfg_if;
use std::{
	ffi::OsStr,
	fmt::{self, Display, Formatter},
	fs,
	io,
	mem,
	os::unix::{
		ffi::OsStrExt,
		fs::FileTypeExt,
	},
	path::{Path, PathBuf},
	str::FromStr,
};

#[cfg(doc)]
use crate::ChannelUserOptions;

#[cfg(all(feature = "serde", test))]
use assert_matches::assert_matches;

cfg_if! {
	if #[cfg(any(target_os = "android", target_os = "linux"))] {
		/// The capacity of the `sun_path` field of the platform's `sockaddr_un` structure, in bytes, including the terminating NUL.
		pub const SUN_PATH_SIZE: usize = 108;
	}
	else {
		/// The capacity of the `sun_path` field of the platform's `sockaddr_un` structure, in bytes, including the terminating NUL.
		pub const SUN_PATH_SIZE: usize = 104;
	}
}

/// The address of a Unix-domain socket: a path in the file system.
///
/// This is the Unix-domain equivalent of a host and port. Two addresses are equal if and only if their paths are equal. A `UnixSocketAddr` does not own any operating system resources.
///
/// There are two special forms:
///
/// * An empty path denotes an unnamed address. Binding a channel to an unnamed address asks the operating system to choose an address (on Linux, an abstract name).
/// * On Linux and Android, a path whose first byte is NUL denotes a name in the abstract namespace. Such addresses are [`Display`]ed with a leading `@` instead of the NUL byte.
///
/// This type is designed to be parsed from a string, using [`str::parse`] or [`FromStr::from_str`]. A string starting with `@` is parsed as an abstract name; any other non-empty string is a path.
#[cfg_attr(feature = "serde", doc = r#"

With the `serde` feature, this type is serialized as, and deserialized from, the same string syntax.
"#)]
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde_with::DeserializeFromStr, serde_with::SerializeDisplay))]
pub struct UnixSocketAddr {
	path: PathBuf,
}

impl UnixSocketAddr {
	/// Creates an address for the given path.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Creates an unnamed address.
	pub fn unnamed() -> Self {
		Self::default()
	}

	/// Creates an address in the abstract namespace.
	///
	/// # Availability
	///
	/// Linux and Android only.
	#[cfg(any(target_os = "android", target_os = "linux"))]
	pub fn new_abstract(name: &[u8]) -> Self {
		let mut bytes = Vec::with_capacity(name.len() + 1);
		bytes.push(0);
		bytes.extend_from_slice(name);

		Self {
			path: OsStr::from_bytes(&bytes).into(),
		}
	}

	/// The path of this address. For abstract addresses, this starts with a NUL byte.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Whether this is an unnamed address.
	pub fn is_unnamed(&self) -> bool {
		self.path.as_os_str().is_empty()
	}

	/// The name of this address in the abstract namespace, without the leading NUL byte, if it is an abstract address.
	pub fn as_abstract_name(&self) -> Option<&[u8]> {
		match self.path.as_os_str().as_bytes() {
			[0, name @ ..] => Some(name),
			_ => None,
		}
	}

	/// Deletes the socket at this address, if there is one.
	///
	/// Specifically, this method checks if there is a Unix-domain socket at [`self.path()`][Self::path], and if so, deletes it. Unnamed and abstract addresses have nothing to delete.
	///
	/// It is not normally necessary to call this method. Unless [`ChannelUserOptions::unix_socket_no_unlink`] is set, stale sockets are automatically deleted by [`listen`][crate::listen()].
	///
	///
	/// # Caveats
	///
	/// The check is imperfect; it is possible for a Unix-domain socket to be replaced with some other kind of file after the check but before the deletion (a [TOCTTOU] issue).
	///
	/// There will *not* be an attempt to check if the socket is still in use.
	///
	///
	/// # Errors
	///
	/// Returns an error if there is an I/O error checking for or deleting the socket. It is not an error if nothing is found, or if something other than a socket is at the path; nothing is deleted in that case.
	///
	/// [TOCTTOU]: https://en.wikipedia.org/wiki/Time-of-check_to_time-of-use
	pub fn cleanup(&self) -> Result<(), CleanupSocketError> {
		if self.is_unnamed() || self.as_abstract_name().is_some() {
			return Ok(());
		}

		cleanup_unix_path_socket(&self.path)
	}
}

impl Display for UnixSocketAddr {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		if self.is_unnamed() {
			write!(f, "(unnamed)")
		}
		else if let Some(name) = self.as_abstract_name() {
			write!(f, "@{}", String::from_utf8_lossy(name))
		}
		else {
			write!(f, "{}", self.path.display())
		}
	}
}

impl FromStr for UnixSocketAddr {
	type Err = InvalidUnixSocketAddrError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Err(InvalidUnixSocketAddrError::Empty);
		}

		if let Some(name) = s.strip_prefix('@') {
			cfg_if! {
				if #[cfg(any(target_os = "android", target_os = "linux"))] {
					return Ok(Self::new_abstract(name.as_bytes()));
				}
				else {
					let _ = name;
					return Err(InvalidUnixSocketAddrError::AbstractNotSupported);
				}
			}
		}

		Ok(Self::new(s))
	}
}

impl From<PathBuf> for UnixSocketAddr {
	fn from(path: PathBuf) -> Self {
		Self { path }
	}
}

impl From<&Path> for UnixSocketAddr {
	fn from(path: &Path) -> Self {
		Self { path: path.to_owned() }
	}
}

/// A `sockaddr_un` record: the address family tag followed by a fixed-size, NUL-padded path.
///
/// This has exactly the platform's native layout, so it can be passed straight to `bind`, `connect`, `getsockname`, and `getpeername`.
#[derive(Clone, Copy)]
pub struct SockAddrUn {
	raw: libc::sockaddr_un,
	len: libc::socklen_t,
}

impl SockAddrUn {
	/// Encodes an address.
	///
	/// Path-based addresses are copied into `sun_path` with a terminating NUL, and the record length is the full size of `sockaddr_un`. Abstract names are copied verbatim. Unnamed addresses carry only the family tag.
	///
	///
	/// # Errors
	///
	/// [`ChannelError::InvalidUnixPath`] if the path (plus its terminating NUL) does not fit in [`SUN_PATH_SIZE`] bytes, or if a path-based address contains a NUL byte. Nothing is truncated.
	pub fn new(addr: &UnixSocketAddr) -> Result<Self, ChannelError> {
		let mut record = Self::empty();
		let bytes: &[u8] = addr.path.as_os_str().as_bytes();

		let invalid = |reason: &'static str| ChannelError::InvalidUnixPath {
			path: addr.path.clone(),
			reason,
		};

		if bytes.is_empty() {
			record.len = path_offset() as libc::socklen_t;
		}
		else if bytes[0] == 0 {
			if bytes.len() > SUN_PATH_SIZE {
				return Err(invalid("abstract name is too long"));
			}

			copy_path(&mut record.raw, bytes);
			record.len = (path_offset() + bytes.len()) as libc::socklen_t;
		}
		else {
			if bytes.contains(&0) {
				return Err(invalid("path contains a NUL byte"));
			}

			if bytes.len() >= SUN_PATH_SIZE {
				return Err(invalid("path is too long"));
			}

			copy_path(&mut record.raw, bytes);
			record.len = mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
		}

		#[cfg(any(
			target_os = "dragonfly",
			target_os = "freebsd",
			target_os = "ios",
			target_os = "macos",
			target_os = "netbsd",
			target_os = "openbsd",
		))] {
			record.raw.sun_len = record.len as u8;
		}

		Ok(record)
	}

	/// A zeroed record with the family tag set, suitable as an output buffer for `getsockname` and similar calls.
	pub fn empty() -> Self {
		// Safety: `sockaddr_un` is plain old data; all zeroes is a valid value.
		let mut raw: libc::sockaddr_un = unsafe { mem::zeroed() };
		raw.sun_family = libc::AF_UNIX as libc::sa_family_t;

		Self {
			raw,
			len: mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
		}
	}

	/// Pointer to the record, for passing to system calls.
	pub fn as_ptr(&self) -> *const libc::sockaddr {
		&self.raw as *const libc::sockaddr_un as *const libc::sockaddr
	}

	/// Mutable pointer to the record and its length, for system calls that fill in an address.
	///
	/// The length starts out as the full capacity of the record.
	pub fn as_mut_parts(&mut self) -> (*mut libc::sockaddr, &mut libc::socklen_t) {
		self.len = mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
		(&mut self.raw as *mut libc::sockaddr_un as *mut libc::sockaddr, &mut self.len)
	}

	/// The length of the record, as passed to or reported by a system call.
	pub fn len(&self) -> libc::socklen_t {
		self.len
	}

	/// Decodes the record back into an address.
	pub fn to_addr(&self) -> UnixSocketAddr {
		let path_len: usize =
			(self.len as usize)
			.saturating_sub(path_offset())
			.min(SUN_PATH_SIZE);

		// Safety: `sun_path` is an array of `c_char`, which has the same size and alignment as `u8`.
		let sun_path: &[u8] = unsafe {
			std::slice::from_raw_parts(self.raw.sun_path.as_ptr().cast::<u8>(), SUN_PATH_SIZE)
		};
		let sun_path: &[u8] = &sun_path[..path_len];

		let bytes: &[u8] = match sun_path {
			[] => sun_path,
			[0, ..] if cfg!(any(target_os = "android", target_os = "linux")) => sun_path,
			_ => {
				let end = sun_path.iter().position(|b| *b == 0).unwrap_or(sun_path.len());
				&sun_path[..end]
			},
		};

		UnixSocketAddr {
			path: OsStr::from_bytes(bytes).into(),
		}
	}
}

impl fmt::Debug for SockAddrUn {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.debug_struct("SockAddrUn")
		.field("addr", &self.to_addr())
		.field("len", &self.len)
		.finish()
	}
}

fn path_offset() -> usize {
	let record = SockAddrUn::empty();
	let base = &record.raw as *const libc::sockaddr_un as usize;
	let path = record.raw.sun_path.as_ptr() as usize;
	path - base
}

fn copy_path(raw: &mut libc::sockaddr_un, bytes: &[u8]) {
	for (dst, src) in raw.sun_path.iter_mut().zip(bytes) {
		*dst = *src as libc::c_char;
	}
}

/// Checks whether the file at the given `path` is a Unix-domain socket.
///
///
/// # Errors
///
/// Any I/O error raised by the operating system call used to get the file's status. If the error's [`io::Error::kind`] is [`io::ErrorKind::NotFound`], then there is no file at the path.
pub fn is_unix_socket(path: &Path) -> io::Result<bool> {
	fs::symlink_metadata(path)
	.map(|metadata| metadata.file_type().is_socket())
}

pub(crate) fn cleanup_unix_path_socket(path: &Path) -> Result<(), CleanupSocketError> {
	let is_unix_socket: bool =
		is_unix_socket(path)
		.or_else(|error| {
			// Treat a “not found” error as equivalent to `Ok(false)`.
			if error.kind() == io::ErrorKind::NotFound {
				Ok(false)
			}
			else {
				Err(error)
			}
		})
		.map_err(|error| CleanupSocketError::Stat { error })?;

	if is_unix_socket {
		if let Err(error) = fs::remove_file(path) {
		if error.kind() != io::ErrorKind::NotFound {
			return Err(CleanupSocketError::Unlink { error });
		}}
	}

	Ok(())
}

#[test]
fn test_sockaddr_un_path() {
	let addr = UnixSocketAddr::new("/tmp/test.sock");
	let record = SockAddrUn::new(&addr).unwrap();

	assert_eq!(record.len() as usize, mem::size_of::<libc::sockaddr_un>());
	assert_eq!(record.raw.sun_family, libc::AF_UNIX as libc::sa_family_t);
	assert_eq!(record.raw.sun_path[0] as u8, b'/');
	assert_eq!(record.raw.sun_path["/tmp/test.sock".len()], 0);
	assert_eq!(record.to_addr(), addr);
}

#[test]
fn test_sockaddr_un_too_long() {
	use assert_matches::assert_matches;

	// One byte is reserved for the terminating NUL.
	let longest = "x".repeat(SUN_PATH_SIZE - 1);
	SockAddrUn::new(&UnixSocketAddr::new(&longest)).unwrap();

	let too_long = "x".repeat(SUN_PATH_SIZE);
	assert_matches!(
		SockAddrUn::new(&UnixSocketAddr::new(&too_long)),
		Err(ChannelError::InvalidUnixPath { .. })
	);

	assert_matches!(
		SockAddrUn::new(&UnixSocketAddr::new(OsStr::from_bytes(b"a\0b"))),
		Err(ChannelError::InvalidUnixPath { .. })
	);
}

#[test]
fn test_sockaddr_un_unnamed() {
	let record = SockAddrUn::new(&UnixSocketAddr::unnamed()).unwrap();
	assert_eq!(record.len() as usize, path_offset());
	assert!(record.to_addr().is_unnamed());
}

#[cfg(any(target_os = "android", target_os = "linux"))]
#[test]
fn test_sockaddr_un_abstract() {
	let addr = UnixSocketAddr::new_abstract(b"unix-channel-test");
	let record = SockAddrUn::new(&addr).unwrap();

	assert_eq!(record.len() as usize, path_offset() + 1 + "unix-channel-test".len());
	assert_eq!(record.to_addr(), addr);
	assert_eq!(record.to_addr().as_abstract_name(), Some(&b"unix-channel-test"[..]));
}

#[test]
fn test_parse_display() {
	let addr: UnixSocketAddr = "/run/app.sock".parse().unwrap();
	assert_eq!(addr.path(), Path::new("/run/app.sock"));
	assert_eq!(addr.to_string(), "/run/app.sock");

	assert!(matches!("".parse::<UnixSocketAddr>(), Err(InvalidUnixSocketAddrError::Empty)));
	assert_eq!(UnixSocketAddr::unnamed().to_string(), "(unnamed)");

	#[cfg(any(target_os = "android", target_os = "linux"))] {
		let addr: UnixSocketAddr = "@app".parse().unwrap();
		assert_eq!(addr.as_abstract_name(), Some(&b"app"[..]));
		assert_eq!(addr.to_string(), "@app");
	}
}

#[cfg(feature = "serde")]
#[test]
fn test_serde() {
	let addr = UnixSocketAddr::new("./target/app.sock");

	let serialized = serde_json::to_value(&addr).unwrap();
	assert_matches!(
		&serialized,
		serde_json::Value::String(string)
		if string == "./target/app.sock"
	);

	assert_eq!(
		serde_json::from_value::<UnixSocketAddr>(serialized).unwrap(),
		addr,
	);
}

#[test]
fn test_cleanup() {
	use assert_matches::assert_matches;

	let socket_path: PathBuf = crate::TEST_SCRATCH.join("cleanup.socket");
	let addr = UnixSocketAddr::new(&socket_path);

	// Nothing there yet.
	addr.cleanup().unwrap();

	// A folder is not a socket, so it is left alone.
	fs::create_dir(&socket_path).unwrap();
	assert_matches!(is_unix_socket(&socket_path), Ok(false));
	addr.cleanup().unwrap();
	assert!(socket_path.is_dir());
	fs::remove_dir(&socket_path).unwrap();

	// A stale socket is deleted.
	let socket = socket2::Socket::new(socket2::Domain::UNIX, socket2::Type::STREAM, None).unwrap();
	socket.bind(&socket2::SockAddr::unix(&socket_path).unwrap()).unwrap();
	drop(socket);

	assert_matches!(is_unix_socket(&socket_path), Ok(true));
	addr.cleanup().unwrap();
	assert_matches!(
		is_unix_socket(&socket_path),
		Err(error)
		if error.kind() == io::ErrorKind::NotFound
	);
}
