use crate::{DEFAULT_PORT, DEVICE_PREFIX};
use std::{error, fmt};

/// Parsed `daq.nsd://<host>[:<port>][/<path>]` connection string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceUrl {
	host: String,
	port: u16,
	path: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InvalidDeviceUrl {
	MissingPrefix,
	EmptyHost,
	InvalidPort,
}

impl fmt::Display for InvalidDeviceUrl {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{self:?}")
	}
}

impl error::Error for InvalidDeviceUrl {}

impl DeviceUrl {
	pub fn parse(connection_string: &str) -> Result<Self, InvalidDeviceUrl> {
		let rest = connection_string
			.strip_prefix(DEVICE_PREFIX)
			.ok_or(InvalidDeviceUrl::MissingPrefix)?;

		let (authority, path) = match rest.find('/') {
			Some(at) => rest.split_at(at),
			None => (rest, ""),
		};

		let (host, port) = match authority.rsplit_once(':') {
			Some((host, port)) => (
				host,
				port.parse().map_err(|_| InvalidDeviceUrl::InvalidPort)?,
			),
			None => (authority, DEFAULT_PORT),
		};

		if host.is_empty() {
			return Err(InvalidDeviceUrl::EmptyHost);
		}

		Ok(Self {
			host: host.into(),
			port,
			path: path.into(),
		})
	}

	pub fn host(&self) -> &str {
		&self.host
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	/// Currently unused and reserved; carried through unparsed.
	pub fn path(&self) -> &str {
		&self.path
	}
}

impl fmt::Display for DeviceUrl {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{DEVICE_PREFIX}{}:{}{}", self.host, self.port, self.path)
	}
}
