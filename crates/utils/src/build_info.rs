use std::sync::LazyLock;

/// Git metadata captured by the build script.
///
/// Both fields fall back gracefully when the crate is built outside a git checkout.
pub(crate) struct BuildInfo {
    pub commit_sha1: Option<&'static str>,
    pub git_dirty: bool,
}

pub(crate) static BUILD_INFO: LazyLock<BuildInfo> = LazyLock::new(|| BuildInfo {
    commit_sha1: option_env!("VERGEN_GIT_SHA"),
    git_dirty: option_env!("VERGEN_GIT_DIRTY") == Some("true"),
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_flag_follows_the_build_environment() {
        assert_eq!(
            BUILD_INFO.git_dirty,
            option_env!("VERGEN_GIT_DIRTY") == Some("true")
        );
    }
}
