//! Authentication and authorization module

pub mod guard;
pub mod middleware;
pub mod password;
pub mod session;
pub mod strength;
pub mod throttle;

pub use guard::{AuthGuard, Realm, Rejection, SessionGuard};
pub use middleware::{require_admin, require_user, AuthContext};
pub use password::PasswordHasher;
pub use session::{InMemorySessionStore, IssuedSession, PendingSession, SessionManager, SessionStore};
pub use strength::{check_password_strength, PasswordStrengthError};
pub use throttle::{AttemptThrottle, InMemoryThrottleStore, ThrottleStatus, ThrottleStore};
