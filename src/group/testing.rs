//! Runs tests that need several MPI processes by re-launching the test binary
//! under `mpirun`.

use std::io::ErrorKind;
use std::process::Command;

/// Given the module path and name of a test function, returns the name as it is
/// used by cargo test.
///
/// # Examples
/// ```ignore
/// assert_eq!(make_full_test_name("a2a_contractor::cache::tests", "t"), "cache::tests::t");
/// ```
pub(crate) fn make_full_test_name(module_path: &str, test_name: &str) -> String {
    match module_path.split_once("::") {
        Some((_, inner)) => format!("{inner}::{test_name}"),
        None => test_name.to_string(),
    }
}

/// Runs the ignored test `test_full_name` of the current test binary with
/// `processes` MPI processes. Skips if `mpirun` is not installed.
pub(crate) fn run_mpi_test(test_full_name: &str, processes: usize) {
    let binary = std::env::current_exe().expect("test binary path");
    let status = Command::new("mpirun")
        .arg("-n")
        .arg(processes.to_string())
        .arg(binary)
        .arg(test_full_name)
        .arg("--ignored")
        .arg("--exact")
        .env("OMPI_ALLOW_RUN_AS_ROOT", "1")
        .env("OMPI_ALLOW_RUN_AS_ROOT_CONFIRM", "1")
        .status();

    match status {
        Ok(status) => assert!(status.success(), "MPI test {test_full_name} failed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            eprintln!("mpirun not found, skipping {test_full_name}");
        }
        Err(e) => panic!("failed to launch mpirun: {e}"),
    }
}

/// Defines a test that runs its body on `processes` MPI ranks.
macro_rules! mpi_test {
    ($processes:expr, fn $name:ident $_:tt $body:block) => {
        paste::paste! {
            #[test]
            fn $name() {
                let full_path = module_path!();
                let test_name = concat!(stringify!($name), "_internal");
                let exact_name = $crate::group::testing::make_full_test_name(full_path, test_name);
                $crate::group::testing::run_mpi_test(&exact_name, $processes);
            }

            #[test]
            #[ignore]
            fn [<$name _internal>]() $body
        }
    };
}

pub(crate) use mpi_test;

#[cfg(test)]
mod tests {
    use super::make_full_test_name;

    #[test]
    fn test_make_test_name() {
        assert_eq!(
            make_full_test_name("a2a_contractor::group::mpi::tests", "test_mpi_broadcast_and_sum_internal"),
            "group::mpi::tests::test_mpi_broadcast_and_sum_internal"
        );
        assert_eq!(
            make_full_test_name("pipeline", "test_two_ranks_internal"),
            "test_two_ranks_internal"
        );
    }
}
