//! Command template expansion
//!
//! `{path}` always becomes the quoted installer path. `{installPath}` is quoted
//! too, except behind an unquoted-assignment flag: NSIS reads everything after
//! `/D=` verbatim up to the end of the line, so quotes there become part of
//! the directory name.

use std::path::Path;

pub const PATH_PLACEHOLDER: &str = "{path}";
pub const INSTALL_PATH_PLACEHOLDER: &str = "{installPath}";

/// Flags whose value must be substituted without quotes
const UNQUOTED_ASSIGNMENT_MARKERS: &[&str] = &["/D="];

pub fn resolve(template: &str, installer: &Path, install_path: &Path) -> String {
    let installer = quote(&installer.display().to_string());
    let with_installer = template.replace(PATH_PLACEHOLDER, &installer);
    substitute_install_path(&with_installer, &install_path.display().to_string())
}

fn substitute_install_path(template: &str, install_path: &str) -> String {
    let mut resolved = String::with_capacity(template.len() + install_path.len());
    let mut rest = template;

    while let Some(idx) = rest.find(INSTALL_PATH_PLACEHOLDER) {
        let (before, after) = rest.split_at(idx);
        resolved.push_str(before);

        if UNQUOTED_ASSIGNMENT_MARKERS
            .iter()
            .any(|marker| resolved.ends_with(marker))
        {
            resolved.push_str(install_path);
        } else {
            resolved.push_str(&quote(install_path));
        }

        rest = &after[INSTALL_PATH_PLACEHOLDER.len()..];
    }

    resolved.push_str(rest);
    resolved
}

fn quote(value: &str) -> String {
    format!("\"{value}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTALLER: &str = r"C:\SetupFlow\installers\app setup.exe";
    const TARGET: &str = r"C:\Program Files\App";

    fn run(template: &str) -> String {
        resolve(template, Path::new(INSTALLER), Path::new(TARGET))
    }

    #[test]
    fn installer_path_is_quoted() {
        assert_eq!(
            run("{path} /S"),
            r#""C:\SetupFlow\installers\app setup.exe" /S"#
        );
    }

    #[test]
    fn nsis_directory_stays_unquoted() {
        assert_eq!(
            run("{path} /S /D={installPath}"),
            r#""C:\SetupFlow\installers\app setup.exe" /S /D=C:\Program Files\App"#
        );
    }

    #[test]
    fn msi_and_inno_targets_are_quoted() {
        assert_eq!(
            run("msiexec /i {path} /qn INSTALLDIR={installPath}"),
            r#"msiexec /i "C:\SetupFlow\installers\app setup.exe" /qn INSTALLDIR="C:\Program Files\App""#
        );
        assert_eq!(
            run("{path} /VERYSILENT /DIR={installPath}"),
            r#""C:\SetupFlow\installers\app setup.exe" /VERYSILENT /DIR="C:\Program Files\App""#
        );
    }

    #[test]
    fn mixed_occurrences_follow_their_own_marker() {
        assert_eq!(
            run("{path} /LOG={installPath} /D={installPath}"),
            r#""C:\SetupFlow\installers\app setup.exe" /LOG="C:\Program Files\App" /D=C:\Program Files\App"#
        );
    }

    #[test]
    fn templates_without_placeholders_pass_through() {
        assert_eq!(run("winget install Git.Git"), "winget install Git.Git");
    }
}
