pub use crate::config::{DEFAULT_DIGEST_TTL, ScopeConfig};
pub use crate::digest::DigestStats;
pub use crate::effects::Deregister;
pub use crate::error::{DigestError, Phase};
pub use crate::host::{Host, ManualHost, TimerId};
pub use crate::scope::{Scope, ScopeId};
pub use crate::value::{Equality, Value};
