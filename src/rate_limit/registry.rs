use super::types::{Profile, ProfileConfig};
use crate::error::{Result, ThrottleError};
use std::collections::HashMap;
use tracing::info;

/// Separator between store key segments, forbidden in profile names
const KEY_SEPARATOR: char = ':';

/// Static table of named rate limiting profiles
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, Profile>,
}

impl ProfileRegistry {
    /// Build a registry, rejecting invalid profiles
    pub fn new(profiles: Vec<Profile>) -> Result<Self> {
        let mut table = HashMap::with_capacity(profiles.len());

        for profile in profiles {
            validate_profile(&profile)?;
            if table.contains_key(&profile.name) {
                return Err(ThrottleError::Config(format!(
                    "Duplicate rate limit profile: {}",
                    profile.name
                )));
            }
            table.insert(profile.name.clone(), profile);
        }

        info!("Loaded {} rate limit profiles", table.len());
        Ok(Self { profiles: table })
    }

    /// Build a registry from configuration entries
    pub fn from_config<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a ProfileConfig)>,
    {
        Self::new(
            entries
                .into_iter()
                .map(|(name, config)| Profile::new(name.clone(), config))
                .collect(),
        )
    }

    /// Look up a profile by name
    pub fn get(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| ThrottleError::InvalidProfile(name.to_string()))
    }

    /// Fail if any of the names is not a registered profile
    pub fn ensure_known<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in names {
            self.get(name)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn validate_profile(profile: &Profile) -> Result<()> {
    if profile.name.is_empty() {
        return Err(ThrottleError::Config(
            "Rate limit profile name cannot be empty".to_string(),
        ));
    }
    if profile.name.contains(KEY_SEPARATOR) {
        return Err(ThrottleError::Config(format!(
            "Rate limit profile name cannot contain '{}': {}",
            KEY_SEPARATOR, profile.name
        )));
    }
    if profile.max_points == 0 {
        return Err(ThrottleError::Config(format!(
            "Rate limit max_points must be > 0 for profile: {}",
            profile.name
        )));
    }
    if profile.window_secs == 0 {
        return Err(ThrottleError::Config(format!(
            "Rate limit window must be > 0 for profile: {}",
            profile.name
        )));
    }
    Ok(())
}
