use anyhow::{Context as _, Result as AnyResult};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

const TOKEN_FILE: &str = "./token";

/// Matches original_source's `localwt/jwt.go` payload: a single admin
/// principal with the `admin` permission, signed HS256 with a freshly
/// generated key.
#[derive(Serialize, Deserialize)]
struct Claims {
    name: String,
    perm: String,
}

/// The freshly minted admin token plus the key needed to validate it at
/// request time. The key never leaves the process; only the signed token
/// is written to disk.
pub struct AdminToken {
    pub token: String,
    key: Vec<u8>,
}

impl AdminToken {
    /// Generates a fresh HS256 signing key, mints the local admin token,
    /// and writes it once to `./token`. Called at startup; the admin CLI
    /// subcommand (`chain-ro weight ...`) reads the same file to
    /// authenticate.
    pub fn bootstrap() -> AnyResult<Self> {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);

        let claims = Claims {
            name: "admin".to_string(),
            perm: "admin".to_string(),
        };
        let token = encode(
            &Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&key),
        )
        .context("signing admin token")?;

        std::fs::write(TOKEN_FILE, &token).with_context(|| format!("writing {TOKEN_FILE}"))?;
        info!(path = TOKEN_FILE, "wrote admin token");
        Ok(Self { token, key })
    }

    /// Validates a bearer token presented to the admin surface against
    /// the key generated at startup.
    pub fn validate(&self, presented: &str) -> bool {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = false;
        match decode::<Claims>(presented, &DecodingKey::from_secret(&self.key), &validation) {
            Ok(data) => data.claims.perm == "admin",
            Err(_) => false,
        }
    }
}

pub fn read_token() -> AnyResult<String> {
    std::fs::read_to_string(TOKEN_FILE).with_context(|| format!("reading {TOKEN_FILE}"))
}
