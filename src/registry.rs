//! Translation of portable option names into the platform's `(level, option)` pairs.

use crate::{
	errors::ChannelError,
	OptionName,
	PayloadKind,
	Scope,
};
use once_cell::sync::Lazy;
use std::{
	collections::HashMap,
	ffi::c_int,
};

/// Where a portable option lives on this platform.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct OptionDescriptor {
	/// The address family scope that this entry was registered under.
	pub scope: Scope,

	/// The protocol level, such as `SOL_SOCKET` or `IPPROTO_IP`.
	pub level: c_int,

	/// The option number at that level, such as `SO_SNDBUF`.
	pub name: c_int,
}

impl OptionDescriptor {
	/// The wire form of this option's value.
	pub fn payload_kind(&self) -> PayloadKind {
		match (self.level, self.name) {
			(libc::SOL_SOCKET, libc::SO_LINGER) => PayloadKind::Linger,
			(libc::SOL_SOCKET, libc::SO_RCVTIMEO) => PayloadKind::Timeval,

			#[cfg(any(target_os = "android", target_os = "linux"))]
			(libc::SOL_SOCKET, libc::SO_PEERCRED) => PayloadKind::Credentials,

			(libc::IPPROTO_IP, libc::IP_MULTICAST_TTL | libc::IP_MULTICAST_LOOP) => PayloadKind::Byte,

			_ => PayloadKind::Int,
		}
	}
}

static REGISTRY: Lazy<HashMap<(OptionName, Scope), OptionDescriptor>> = Lazy::new(|| {
	let mut map = HashMap::new();

	let mut add = |option: OptionName, scope: Scope, level: c_int, name: c_int| {
		map.insert((option, scope), OptionDescriptor { scope, level, name });
	};

	add(OptionName::Broadcast,         Scope::Unspecified, libc::SOL_SOCKET,   libc::SO_BROADCAST        );
	add(OptionName::KeepAlive,         Scope::Unspecified, libc::SOL_SOCKET,   libc::SO_KEEPALIVE        );
	add(OptionName::Linger,            Scope::Unspecified, libc::SOL_SOCKET,   libc::SO_LINGER           );
	add(OptionName::SendBufferSize,    Scope::Unspecified, libc::SOL_SOCKET,   libc::SO_SNDBUF           );
	add(OptionName::ReceiveBufferSize, Scope::Unspecified, libc::SOL_SOCKET,   libc::SO_RCVBUF           );
	add(OptionName::ReuseAddress,      Scope::Unspecified, libc::SOL_SOCKET,   libc::SO_REUSEADDR        );
	add(OptionName::NoDelay,           Scope::Unspecified, libc::IPPROTO_TCP,  libc::TCP_NODELAY         );
	add(OptionName::IpTos,             Scope::Inet,        libc::IPPROTO_IP,   libc::IP_TOS              );
	add(OptionName::MulticastInterface,Scope::Inet,        libc::IPPROTO_IP,   libc::IP_MULTICAST_IF     );
	add(OptionName::MulticastTtl,      Scope::Inet,        libc::IPPROTO_IP,   libc::IP_MULTICAST_TTL    );
	add(OptionName::MulticastLoop,     Scope::Inet,        libc::IPPROTO_IP,   libc::IP_MULTICAST_LOOP   );
	add(OptionName::MulticastInterface,Scope::Inet6,       libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_IF   );
	add(OptionName::MulticastTtl,      Scope::Inet6,       libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_HOPS );
	add(OptionName::MulticastLoop,     Scope::Inet6,       libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_LOOP );
	add(OptionName::ReceiveTimeout,    Scope::Unspecified, libc::SOL_SOCKET,   libc::SO_RCVTIMEO         );

	#[cfg(any(target_os = "android", target_os = "linux"))]
	add(OptionName::PeerCredentials,   Scope::Unix,        libc::SOL_SOCKET,   libc::SO_PEERCRED         );

	tracing::trace!(entries = map.len(), "socket option registry built");

	map
});

/// Looks up the `(level, option)` pair for an option in a scope.
///
/// The scope has to match exactly: an option registered for [`Scope::Inet`] is not found under [`Scope::Unspecified`], and vice versa.
///
///
/// # Errors
///
/// [`ChannelError::UnsupportedOption`] if the option has no entry for that scope on this platform.
pub fn resolve(option: OptionName, scope: Scope) -> Result<OptionDescriptor, ChannelError> {
	REGISTRY
	.get(&(option, scope))
	.copied()
	.ok_or(ChannelError::UnsupportedOption { option })
}
