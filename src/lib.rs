//! This library provides non-blocking, cancellable [Unix-domain socket](https://en.wikipedia.org/wiki/Unix_domain_socket) channels, layered directly over the POSIX socket system calls.
//!
//! A [`UnixChannel`] can be used from several threads at once. One thread may be blocked reading while another writes, and a third closes the channel; the blocked threads are woken and fail with [`ChannelError::AsynchronousClose`][crate::errors::ChannelError::AsynchronousClose], and the socket's file descriptor is released exactly once, only after every thread has let go of it.
//!
//!
//! # Usage
//!
//! The entry points of this library are [`connect`][connect()] and [`listen`][listen()], which open channels according to user settings in [`ChannelUserOptions`]. Channels can also be created directly with [`UnixChannel::open`], and then [bound][UnixChannel::bind] and [connected][UnixChannel::connect] step by step.
//!
//! Reads and writes work on [`std::io::Cursor`] windows, whose position advances past the bytes transferred. Channels also implement [`std::io::Read`] and [`std::io::Write`].
//!
//! Socket options are set and queried through typed markers such as [`SoRcvBuf`] and [`SoLinger`]. Each portable option name is translated into the platform's `(level, option)` pair by the [`registry`].
//!
//! For event loops, channels can be switched to non-blocking mode, [polled][UnixChannel::poll], and [registered][UnixChannel::register] with a selector.
//!
//!
//! # Feature flags and platform support
//!
//! This library works on Unix-like platforms only. Some items are limited in which platforms they're available on, or are only available if a particular feature flag is enabled. Such differences are noted with an “Availability” section in those items' documentation.
#![cfg_attr(all(
	feature = "clap",
	feature = "serde",
), doc = r#"

## Available feature flags

This library has the following feature flags:

* `clap`: Support parsing channel options from the command line using [`clap`]. Specifically, this adds an implementation of [`clap::Args`] for [`ChannelUserOptions`].
* `serde`: Support parsing channel options from configuration files or environment variables using [`serde`]. Specifically, this adds an implementation of [`serde::Deserialize`] to [`ChannelUserOptions`], and of [`serde::Serialize`] and [`serde::Deserialize`] to [`UnixSocketAddr`].
"#)]
//!
//!
//! # Logging
//!
//! This library reports channel lifecycle events (connecting, binding, closing, and deferred descriptor release) through [`tracing`], at the `debug` level. Failures that cannot be returned to a caller, such as a failed close during [`Drop`], are reported at the `warn` level. No subscriber is installed by this library.

#![allow(clippy::tabs_in_doc_comments)] // This project uses tabs for indentation throughout, including in documentation examples.

mod addr;
mod channel;
mod credentials;
pub mod errors;
pub mod net;
mod open;
mod options;
pub mod registry;
mod selector;
mod sockopt;
pub mod syscall;

#[cfg(test)]
mod testing;

pub use self::{
	addr::*,
	channel::*,
	credentials::*,
	open::*,
	options::*,
	registry::OptionDescriptor,
	selector::*,
	sockopt::*,
	syscall::{
		ConnectStatus,
		IoStatus,
		NativeThread,
		PollStatus,
		Syscalls,
	},
	sys::PosixSyscalls,
};

cfg_if::cfg_if! {
	if #[cfg(unix)] {
		#[path = "sys/unix.rs"] mod sys;
	}
	else {
		compile_error!("unix_channel only supports Unix-like platforms");
	}
}

#[cfg(test)]
pub(crate) static TEST_SCRATCH: once_cell::sync::Lazy<std::path::PathBuf> = once_cell::sync::Lazy::new(|| {
	let path: std::path::PathBuf = ["target", "lib-test-scratch"].into_iter().collect();

	// Try to remove the scratch folder, but ignore errors in doing so.
	let _ = std::fs::remove_dir_all(&path);

	std::fs::create_dir_all(&path)
	.expect("couldn't create test scratch folder");

	path
});
