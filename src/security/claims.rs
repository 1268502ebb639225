use serde::{Deserialize, Serialize};

/// JWT payload issued by the account service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserClaims {
    pub sub: String,
    pub name: Option<String>,
    pub roles: Option<Vec<String>>,
    /// Expiry as a UNIX timestamp.
    pub exp: usize,
}

/// Authenticated caller, inserted into request extensions.
#[derive(Clone, Debug)]
pub struct UserContext {
    pub user_id: String,
    pub claims: UserClaims,
}
