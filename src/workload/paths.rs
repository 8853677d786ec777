//! Deterministic directory placement for file indexes
//!
//! Two schemes map a file index to a relative subdirectory path:
//!
//! - **Sequential**: consecutive indexes fill one directory with
//!   `files_per_dir` files, then move on. Directory numbers are rendered as
//!   radix-`dirs_per_dir` digits, most significant first, so the tree stays
//!   as shallow as `files_per_dir` and `dirs_per_dir` allow. Components are
//!   named `d_NNN`.
//! - **Hashed**: the index is scattered with a large prime modulo the
//!   iteration count, producing a random-looking walk over `h_NNN`
//!   components. Directory-listing operations cannot run in this mode
//!   because sequential indexes no longer share directories.

/// Prime multiplier for hashed directory scattering.
pub const DIR_HASH_PRIME: u64 = 900_593;

/// Relative subdirectory path for `file_num` under the sequential scheme.
pub fn seq_dir_name(file_num: usize, files_per_dir: usize, dirs_per_dir: usize) -> String {
    let mut dir_in = file_num / files_per_dir;

    // powers of dirs_per_dir not greater than dir_in
    let mut level_dirs: Vec<usize> = Vec::new();
    let mut dirs_for_this_level = dirs_per_dir;
    while dirs_for_this_level <= dir_in {
        level_dirs.push(dirs_for_this_level);
        dirs_for_this_level *= dirs_per_dir;
    }

    // each digit is the quotient by the next lower power, like base 10
    let mut components: Vec<String> = Vec::with_capacity(level_dirs.len() + 1);
    for dirs_in_level in level_dirs.iter().rev() {
        let quotient = dir_in / dirs_in_level;
        dir_in -= quotient * dirs_in_level;
        components.push(format!("d_{:03}", quotient));
    }
    components.push(format!("d_{:03}", dir_in));
    components.join("/")
}

/// Relative subdirectory path for `file_num` under the hashed scheme.
///
/// May be empty: small scattered indexes live directly under the tree root.
pub fn hashed_dir_name(
    file_num: usize,
    iterations: usize,
    files_per_dir: usize,
    dirs_per_dir: usize,
) -> String {
    let random_hash = (file_num as u64 * DIR_HASH_PRIME) % iterations.max(1) as u64;
    let mut dir_num = random_hash as usize / files_per_dir;
    let mut components: Vec<String> = Vec::new();
    while dir_num > 1 {
        let dir_num_hash = (dir_num as u64 * DIR_HASH_PRIME) % dirs_per_dir as u64;
        components.insert(0, format!("h_{:03}", dir_num_hash));
        dir_num /= dirs_per_dir;
    }
    components.join("/")
}

/// Leaf file name: `{prefix}_{host}_{worker_id}_{file_num}_{suffix}`.
///
/// Embedding host and worker id keeps names collision-free even when every
/// worker shares one directory tree.
pub fn file_basename(
    prefix: &str,
    host: &str,
    worker_id: &str,
    file_num: usize,
    suffix: &str,
) -> String {
    format!("{}_{}_{}_{}_{}", prefix, host, worker_id, file_num, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_first_directory() {
        assert_eq!(seq_dir_name(0, 100, 10), "d_000");
        assert_eq!(seq_dir_name(99, 100, 10), "d_000");
        assert_eq!(seq_dir_name(100, 100, 10), "d_001");
    }

    #[test]
    fn test_seq_radix_digits() {
        // 29 full directories at 3 dirs per level: 29 = 1*27 + 0*9 + 0*3 + 2
        assert_eq!(seq_dir_name(29 * 20, 20, 3), "d_001/d_000/d_000/d_002");
        // 320 = 6*49 + 3*7 + 5
        assert_eq!(seq_dir_name(320 * 20, 20, 7), "d_006/d_003/d_005");
    }

    #[test]
    fn test_seq_paths_unique_within_worker() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for j in 0..500 {
            let full = format!(
                "{}/{}",
                seq_dir_name(j, 5, 2),
                file_basename("p", "h", "00", j, "s")
            );
            assert!(seen.insert(full), "collision at index {}", j);
        }
    }

    #[test]
    fn test_hashed_known_path() {
        // 500 files, 5 per dir, fanout 4: index 499 scatters to a 3-deep path
        assert_eq!(hashed_dir_name(499, 500, 5, 4), "h_001/h_000/h_001");
    }

    #[test]
    fn test_hashed_can_be_root() {
        // indexes whose hash lands in the first couple of directories stay at
        // the tree root
        let mut saw_root = false;
        for j in 0..500 {
            if hashed_dir_name(j, 500, 5, 4).is_empty() {
                saw_root = true;
                break;
            }
        }
        assert!(saw_root);
    }

    #[test]
    fn test_hashed_bijective_with_basename() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for j in 0..500 {
            let full = format!(
                "{}/{}",
                hashed_dir_name(j, 500, 5, 4),
                file_basename("p", "h", "00", j, "s")
            );
            assert!(seen.insert(full), "collision at index {}", j);
        }
        assert_eq!(seen.len(), 500);
    }

    #[test]
    fn test_file_basename_embeds_identity() {
        assert_eq!(
            file_basename("p", "node1", "03", 42, "deep"),
            "p_node1_03_42_deep"
        );
    }
}
