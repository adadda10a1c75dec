pub mod cert;
pub mod read;
pub mod renew_token;
pub mod setup;
pub mod version;

pub use cert::Cert;
pub use read::Read;
pub use renew_token::RenewToken;
pub use setup::Setup;
pub use version::Version;
