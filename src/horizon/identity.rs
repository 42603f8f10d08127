//! Fresh identity material for each unit of work.
//!
//! Keys are ed25519 and rendered as Stellar strkeys (`G...` account ids,
//! `S...` seeds).

use ed25519_dalek::SigningKey;
use std::fmt;
use stellar_strkey::ed25519::{PrivateKey, PublicKey};

#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub public_id: String,
    pub secret: String,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_id", &self.public_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Produces one identity per unit. `idx` is informational; implementations
/// must still return distinct identities for distinct calls.
pub trait IdentitySource: Send + Sync {
    fn generate(&self, idx: usize) -> Identity;
}

/// Random ed25519 keypairs, one per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomKeypairs;

impl IdentitySource for RandomKeypairs {
    fn generate(&self, _idx: usize) -> Identity {
        let seed: [u8; 32] = rand::random();
        identity_from_seed(&seed)
    }
}

pub fn identity_from_seed(seed: &[u8; 32]) -> Identity {
    let signing = SigningKey::from_bytes(seed);
    Identity {
        public_id: PublicKey(signing.verifying_key().to_bytes()).to_string(),
        secret: PrivateKey(*seed).to_string(),
    }
}
