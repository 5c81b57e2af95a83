//! Identity display

use anyhow::{Context, Result};
use serde::Serialize;
use towerlink_common::{IdentityKeyPair, NodePaths};

use crate::output::{print_item, OutputFormat, TableDisplay};

#[derive(Serialize)]
pub struct IdentityDisplay {
    pub fingerprint: String,
    pub public_key: String,
}

impl TableDisplay for IdentityDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Fingerprint", "Public Key"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.fingerprint.clone(), self.public_key.clone()]
    }
}

pub fn execute(paths: &NodePaths, format: OutputFormat) -> Result<()> {
    let identity = IdentityKeyPair::load(paths.identity_private_key())
        .context("no identity key found, run `towerlink init` first")?;

    print_item(
        &IdentityDisplay {
            fingerprint: identity.fingerprint(),
            public_key: identity.public_key_hex(),
        },
        format,
    );
    Ok(())
}
