use rand::Rng;

use syslens_common::token::{self, MasterCipher};

use crate::persistence::{self as db, Db};
use crate::Result;

/// Mints, verifies, and recovers node credentials.
///
/// The master key is read-only after boot; rotating it means re-encrypting
/// every escrow blob in one pass and restarting. Stored hashes are
/// untouched by rotation.
#[derive(Clone)]
pub struct IdentityService {
    master: MasterCipher,
}

/// Everything produced at first registration. The cleartext token leaves
/// the process exactly once, in the registration response.
#[derive(Debug)]
pub struct IssuedCredentials {
    pub token: String,
    pub token_hash: String,
    pub encrypted_token: String,
}

impl IdentityService {
    pub fn new(master_key: impl Into<String>) -> Self {
        Self {
            master: MasterCipher::new(master_key),
        }
    }

    /// Issues credentials for a new node. `provided` lets an operator
    /// supply their own token instead of a generated one.
    pub fn mint(&self, provided: Option<String>) -> Result<IssuedCredentials> {
        let token = provided.unwrap_or_else(token::generate_token);
        let token_hash = token::hash_token(&token)?;
        let encrypted_token = self
            .master
            .seal(&token)
            .map_err(|err| anyhow::anyhow!("failed to escrow token: {err}"))?;

        Ok(IssuedCredentials {
            token,
            token_hash,
            encrypted_token,
        })
    }

    /// ValidateToken(node_id, t) := bcrypt_verify(t, stored hash). The
    /// comparison is constant-time inside the hashing library; there is no
    /// short-circuit.
    pub fn verify(&self, token: &str, stored_hash: &str) -> bool {
        token::verify_token(token, stored_hash)
    }

    /// Operator recovery: unwraps the escrow blob back to cleartext.
    pub fn recover(&self, encrypted_token: &str) -> Result<String> {
        self.master
            .open(encrypted_token)
            .map_err(|err| anyhow::anyhow!("failed to recover token: {err}"))
    }
}

/// Linear scan verifying the token against every stored hash. O(N·bcrypt);
/// acceptable on the management path, never used for metrics ingest.
pub async fn find_node_by_token(
    pool: &Db,
    identity: &IdentityService,
    token: &str,
) -> Result<Option<db::NodeRecord>> {
    for (node_id, hash) in db::nodes::list_token_hashes(pool).await? {
        if identity.verify(token, &hash) {
            return db::nodes::get_node(pool, &node_id).await;
        }
    }
    Ok(None)
}

/// Generated node id: `node-<unix-ts>-<rand8>`.
pub fn generate_node_id() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect();
    format!("node-{}-{}", chrono::Utc::now().timestamp(), suffix)
}
