use std::path::{Path, PathBuf};

use inquire::Password;
use rand_core::OsRng;
use ssh_key::{Algorithm, HashAlg, LineEnding, PrivateKey, PublicKey};

use crate::error::GshError;
use crate::prompt::map_inquire_err;

/// The user's keypair on disk: `<path>` and `<path>.pub`.
#[derive(Debug, Clone)]
pub struct KeyStore {
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    comment: String,
}

impl KeyStore {
    pub fn new(private_key_path: impl Into<PathBuf>, comment: impl Into<String>) -> Self {
        let private_key_path = private_key_path.into();
        let mut public = private_key_path.clone().into_os_string();
        public.push(".pub");
        Self {
            private_key_path,
            public_key_path: PathBuf::from(public),
            comment: comment.into(),
        }
    }

    /// Generate an Ed25519 keypair if either half is missing.
    ///
    /// `force_overwrite` regenerates even when both files exist. With
    /// `allow_passphrase` the user is asked for a passphrase (empty means
    /// none); otherwise the private key is written unencrypted.
    pub fn ensure_keys_exist(
        &self,
        force_overwrite: bool,
        allow_passphrase: bool,
    ) -> Result<(), GshError> {
        let present = self.private_key_path.exists() && self.public_key_path.exists();
        if present && !force_overwrite {
            return Ok(());
        }
        if !present && (self.private_key_path.exists() || self.public_key_path.exists()) {
            tracing::warn!(
                path = %self.private_key_path.display(),
                "found only half of a keypair, regenerating"
            );
        }

        let passphrase = if allow_passphrase {
            let entered = Password::new("Enter passphrase (empty for no passphrase):")
                .prompt()
                .map_err(map_inquire_err)?;
            Some(entered).filter(|p| !p.is_empty())
        } else {
            None
        };

        self.generate(passphrase.as_deref())
    }

    fn generate(&self, passphrase: Option<&str>) -> Result<(), GshError> {
        tracing::info!(path = %self.private_key_path.display(), "generating ssh keypair");

        if let Some(parent) = self.private_key_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| GshError::Io {
                context: format!("creating {}", parent.display()),
                source,
            })?;
        }
        // write_openssh_file refuses to clobber on some platforms
        for path in [&self.private_key_path, &self.public_key_path] {
            if path.exists() {
                std::fs::remove_file(path).map_err(|source| GshError::Io {
                    context: format!("removing {}", path.display()),
                    source,
                })?;
            }
        }

        let mut key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(key_error)?;
        key.set_comment(self.comment.as_str());
        let public = key.public_key().to_openssh().map_err(key_error)?;

        let key = match passphrase {
            Some(p) => key.encrypt(&mut OsRng, p).map_err(key_error)?,
            None => key,
        };
        key.write_openssh_file(&self.private_key_path, LineEnding::LF)
            .map_err(key_error)?;
        restrict_permissions(&self.private_key_path)?;

        std::fs::write(&self.public_key_path, format!("{public}\n")).map_err(|source| {
            GshError::Io {
                context: format!("writing {}", self.public_key_path.display()),
                source,
            }
        })?;
        Ok(())
    }

    /// The public key file's single line, as stored.
    pub fn public_key(&self) -> Result<String, GshError> {
        let text = std::fs::read_to_string(&self.public_key_path).map_err(|source| {
            GshError::Io {
                context: format!("reading {}", self.public_key_path.display()),
                source,
            }
        })?;
        let line = text.lines().map(str::trim).find(|l| !l.is_empty()).ok_or_else(|| {
            GshError::Key {
                message: format!("{} is empty", self.public_key_path.display()),
            }
        })?;
        PublicKey::from_openssh(line).map_err(|e| GshError::Key {
            message: format!("{} is not a valid public key: {e}", self.public_key_path.display()),
        })?;
        Ok(line.to_string())
    }

    /// `"<alg> <base64>"`, with `" <comment>"` appended when asked for.
    pub fn to_entry(&self, include_comment: bool) -> Result<String, GshError> {
        format_entry(&self.public_key()?, include_comment)
    }

    /// Whether the private key is protected by a passphrase.
    pub fn is_encrypted(&self) -> Result<bool, GshError> {
        let key = PrivateKey::read_openssh_file(&self.private_key_path).map_err(key_error)?;
        Ok(key.is_encrypted())
    }

    /// `SHA256:...` fingerprint of the public key.
    pub fn fingerprint(&self) -> Result<String, GshError> {
        let key = PublicKey::from_openssh(&self.public_key()?).map_err(key_error)?;
        Ok(key.fingerprint(HashAlg::Sha256).to_string())
    }
}

pub(crate) fn format_entry(line: &str, include_comment: bool) -> Result<String, GshError> {
    let mut fields = line.split_whitespace();
    let (Some(alg), Some(data)) = (fields.next(), fields.next()) else {
        return Err(GshError::Key {
            message: format!("malformed public key line: '{line}'"),
        });
    };
    let comment = fields.collect::<Vec<_>>().join(" ");
    if include_comment && !comment.is_empty() {
        Ok(format!("{alg} {data} {comment}"))
    } else {
        Ok(format!("{alg} {data}"))
    }
}

fn key_error(e: ssh_key::Error) -> GshError {
    GshError::Key {
        message: e.to_string(),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), GshError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|source| {
        GshError::Io {
            context: format!("setting permissions on {}", path.display()),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), GshError> {
    Ok(())
}
