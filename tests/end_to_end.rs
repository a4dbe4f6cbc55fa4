use assert_matches::assert_matches;
use once_cell::sync::Lazy;
use std::{
	fs,
	io::{Cursor, Read, Write},
	path::PathBuf,
	thread,
	time::Duration,
};
use unix_channel::{
	errors::{ChannelError, SocketErrorKind},
	ChannelState,
	ChannelUserOptions,
	Interest,
	IoStatus,
	PollStatus,
	SoRcvBuf,
	UnixChannel,
	UnixSocketAddr,
};

static SCRATCH: Lazy<PathBuf> = Lazy::new(|| {
	let path: PathBuf = ["target", "end-to-end-test-scratch"].into_iter().collect();
	let _ = fs::remove_dir_all(&path);
	fs::create_dir_all(&path).unwrap();
	path
});

fn scratch_addr(name: &str) -> UnixSocketAddr {
	UnixSocketAddr::new(SCRATCH.join(name))
}

/// Opens a listener at `name`, connects a client to it, and accepts the connection.
fn connected_pair(name: &str, client_options: &ChannelUserOptions) -> (UnixChannel, UnixChannel) {
	let addr = scratch_addr(name);
	let listener = unix_channel::listen(&addr, &ChannelUserOptions::default()).unwrap();

	let client = unix_channel::connect(&addr, client_options).unwrap();
	let server = unix_channel::accept(&listener, &ChannelUserOptions::default()).unwrap();

	(client, server)
}

#[test]
fn stream_round_trip() {
	let (client, server) = connected_pair("round-trip.socket", &ChannelUserOptions::default());

	assert!(client.is_connected());
	assert!(server.is_connected());
	assert_eq!(client.remote_address().unwrap(), Some(scratch_addr("round-trip.socket")));
	assert_eq!(server.local_address().unwrap(), Some(scratch_addr("round-trip.socket")));

	let mut out = Cursor::new([1u8, 2, 3]);
	assert_eq!(client.write(&mut out).unwrap(), IoStatus::Transferred(3));
	assert_eq!(out.position(), 3);

	let mut input = Cursor::new([0u8; 3]);
	assert_eq!(server.read(&mut input).unwrap(), IoStatus::Transferred(3));
	assert_eq!(input.get_ref(), &[1, 2, 3]);

	client.shutdown_output().unwrap();

	let mut input = Cursor::new([0u8; 3]);
	assert_eq!(server.read(&mut input).unwrap(), IoStatus::Eof);

	assert_matches!(client.write(&mut Cursor::new([4u8])), Err(ChannelError::Closed));
}

#[test]
fn stream_adaptors() {
	let (mut client, mut server) = connected_pair("adaptors.socket", &ChannelUserOptions::default());

	client.write_all(b"Hello, world!").unwrap();
	client.shutdown_output().unwrap();

	let mut received = String::new();
	server.read_to_string(&mut received).unwrap();
	assert_eq!(received, "Hello, world!");
}

#[test]
fn scatter_gather() {
	let (client, server) = connected_pair("scatter-gather.socket", &ChannelUserOptions::default());

	let mut out = [Cursor::new(&b"abc"[..]), Cursor::new(&b"defg"[..])];
	assert_eq!(client.write_many(&mut out).unwrap(), IoStatus::Transferred(7));

	let mut input = [Cursor::new(vec![0u8; 2]), Cursor::new(vec![0u8; 5])];
	assert_eq!(server.read_many(&mut input).unwrap(), IoStatus::Transferred(7));
	assert_eq!(input[0].get_ref()[..], b"ab"[..]);
	assert_eq!(input[1].get_ref()[..], b"cdefg"[..]);
}

#[cfg(any(target_os = "android", target_os = "linux"))]
#[test]
fn peer_credentials() {
	let (client, server) = connected_pair("credentials.socket", &ChannelUserOptions::default());

	let credentials = server.credentials().unwrap().unwrap();
	assert_eq!(credentials.pid(), nix::unistd::Pid::this());
	assert_eq!(credentials.uid(), nix::unistd::getuid());
	assert_eq!(credentials.gid(), nix::unistd::getgid());

	assert!(client.credentials().unwrap().is_some());
}

#[test]
fn non_blocking_poll() {
	let mut options = ChannelUserOptions::default();
	options.non_blocking = true;
	options.receive_buffer_size = Some(16384);

	let (client, server) = connected_pair("non-blocking.socket", &options);
	assert!(client.finish_connect().unwrap());
	assert!(!client.is_blocking());
	assert!(client.get_option(SoRcvBuf).unwrap() > 0);

	let mut input = Cursor::new([0u8; 8]);
	assert_eq!(client.read(&mut input).unwrap(), IoStatus::WouldBlock);
	assert_eq!(
		client.poll(Interest::READ, Some(Duration::from_millis(10))).unwrap(),
		PollStatus::TimedOut,
	);

	server.write(&mut Cursor::new(*b"ready")).unwrap();

	let revents = match client.poll(Interest::READ, Some(Duration::from_secs(5))).unwrap() {
		PollStatus::Ready(revents) => revents,
		other => panic!("unexpected poll status {other:?}"),
	};
	assert_eq!(client.translate_ready_ops(revents, Interest::READ | Interest::WRITE), Interest::READ);

	assert_eq!(client.read(&mut input).unwrap(), IoStatus::Transferred(5));
	assert_eq!(&input.get_ref()[..5], b"ready");
}

#[test]
fn close_wakes_blocked_reader() {
	let (client, _server) = connected_pair("close-wakes.socket", &ChannelUserOptions::default());

	thread::scope(|scope| {
		let reader = scope.spawn(|| client.read(&mut Cursor::new([0u8; 8])));

		thread::sleep(Duration::from_millis(100));
		client.close().unwrap();

		// The reader normally is blocked by now, but may not have started yet.
		assert_matches!(
			reader.join().unwrap(),
			Err(ChannelError::AsynchronousClose | ChannelError::Closed)
		);
	});

	assert!(!client.is_open());
	assert_eq!(client.to_string(), "UnixChannel[closed]");
}

#[cfg(any(target_os = "android", target_os = "linux"))]
#[test]
fn close_interrupts_connect_to_full_backlog() {
	let addr = scratch_addr("full-backlog.socket");

	let mut options = ChannelUserOptions::default();
	options.listen_socket_backlog = Some(0);
	let _listener = unix_channel::listen(&addr, &options).unwrap();

	let sockaddr = socket2::SockAddr::unix(addr.path()).unwrap();
	let mut queued = Vec::new();

	loop {
		let socket = socket2::Socket::new(socket2::Domain::UNIX, socket2::Type::STREAM, None).unwrap();
		socket.set_nonblocking(true).unwrap();

		match socket.connect(&sockaddr) {
			Ok(()) => queued.push(socket),
			Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
			Err(error) => panic!("{error}"),
		}

		assert!(queued.len() < 64, "listener backlog never filled up");
	}

	let channel = UnixChannel::open().unwrap();

	thread::scope(|scope| {
		let connector = scope.spawn(|| channel.connect(&addr));

		thread::sleep(Duration::from_millis(100));
		channel.close().unwrap();

		// The connector normally is blocked by now, but may not have started yet.
		assert_matches!(
			connector.join().unwrap(),
			Err(ChannelError::AsynchronousClose | ChannelError::Closed)
		);
	});

	assert_eq!(channel.state(), ChannelState::Killed);
}

#[test]
fn connect_refused() {
	let addr = scratch_addr("not-listening.socket");

	// Bound, but not listening.
	let socket = socket2::Socket::new(socket2::Domain::UNIX, socket2::Type::STREAM, None).unwrap();
	socket.bind(&socket2::SockAddr::unix(addr.path()).unwrap()).unwrap();

	let channel = UnixChannel::open().unwrap();
	assert_matches!(
		channel.connect(&addr),
		Err(ChannelError::Socket(error)) if error.kind == SocketErrorKind::ConnectionRefused
	);
	assert!(!channel.is_open());

	let channel = UnixChannel::open().unwrap();
	assert_matches!(
		channel.connect(&scratch_addr("nothing-here.socket")),
		Err(ChannelError::Socket(error)) if error.raw_os_error() == Some(libc::ENOENT)
	);
}

#[test]
fn listen_replaces_stale_socket() {
	let addr = scratch_addr("nested/folder/stale.socket");

	for _ in 0..=1 {
		let listener = unix_channel::listen(&addr, &ChannelUserOptions::default()).unwrap();
		let client = unix_channel::connect(&addr, &ChannelUserOptions::default()).unwrap();
		assert!(client.is_connected());
		drop(listener);
	}

	let mut options = ChannelUserOptions::default();
	options.unix_socket_no_unlink = true;

	assert_matches!(
		unix_channel::listen(&addr, &options),
		Err(unix_channel::errors::ListenError::Bind { .. })
	);
}

#[cfg(any(target_os = "android", target_os = "linux"))]
#[test]
fn datagram_autobind() {
	let channel = UnixChannel::open_with(socket2::Type::DGRAM).unwrap();
	channel.bind(None).unwrap();

	let local = channel.local_address().unwrap().unwrap();
	assert!(local.as_abstract_name().is_some());
	assert_matches!(channel.bind(None), Err(ChannelError::AlreadyBound));
}
