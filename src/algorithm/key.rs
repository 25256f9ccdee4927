//! Server host key signature algorithms, as named by [`ssh_key`].

pub use ssh_key::Algorithm as Key;
