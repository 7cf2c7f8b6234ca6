// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

#[derive(Debug)]
pub enum Error {
	/// Geometry or latency parameters that cannot describe a cache.
	InvalidConfiguration(String),
	/// Broken bookkeeping between the tag, data and hash arrays. Carries a
	/// diagnostic with the relevant array state.
	Corruption(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::InvalidConfiguration(e) => write!(f, "Invalid configuration: {}", e),
			Error::Corruption(e) => write!(f, "Corruption: {}", e),
		}
	}
}

impl std::error::Error for Error {}
