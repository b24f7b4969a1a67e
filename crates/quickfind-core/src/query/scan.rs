//! The substring scan at the heart of the query engine: find the next
//! occurrence of `needle` in the packed name buffer, while also reporting
//! how many NUL bytes were passed to get there.
//!
//! Because every record's name is NUL-terminated and names are appended in
//! the same order as records, "NULs passed" *is* "records passed" — the
//! match never needs to carry or look up a separate record pointer.
//!
//! An AVX2 fast path does the byte-candidate search 32 bytes at a time;
//! elsewhere (or when the CPU lacks AVX2) a scalar loop gives identical
//! results. Both paths count NULs over the same `haystack[..match_start]`
//! range, so behavior never diverges between them.

pub struct Match {
    pub nul_count_before: usize,
}

pub fn find_next_match(haystack: &[u8], needle: &[u8], case_sensitive: bool) -> Option<Match> {
    if needle.is_empty() {
        return None;
    }

    let match_start = find_substring(haystack, needle, case_sensitive)?;
    let nul_count_before = haystack[..match_start].iter().filter(|&&b| b == 0).count();
    Some(Match { nul_count_before })
}

fn find_substring(haystack: &[u8], needle: &[u8], case_sensitive: bool) -> Option<usize> {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return unsafe { simd::find_substring_avx2(haystack, needle, case_sensitive) };
        }
    }
    scalar::find_substring(haystack, needle, case_sensitive)
}

mod scalar {
    pub fn find_substring(haystack: &[u8], needle: &[u8], case_sensitive: bool) -> Option<usize> {
        if needle.len() > haystack.len() {
            return None;
        }
        let last = haystack.len() - needle.len();
        for start in 0..=last {
            if matches_at(haystack, start, needle, case_sensitive) {
                return Some(start);
            }
        }
        None
    }

    fn matches_at(haystack: &[u8], start: usize, needle: &[u8], case_sensitive: bool) -> bool {
        let window = &haystack[start..start + needle.len()];
        if case_sensitive {
            window == needle
        } else {
            window
                .iter()
                .zip(needle)
                .all(|(&a, &b)| a.to_ascii_lowercase() == b.to_ascii_lowercase())
        }
    }
}

#[cfg(target_arch = "x86_64")]
mod simd {
    use std::arch::x86_64::*;

    /// Scan 32-byte-wide blocks for candidate positions matching `needle`'s
    /// first byte, confirming each candidate with a byte compare. Falls
    /// back to the scalar path for the final partial block.
    #[target_feature(enable = "avx2")]
    pub unsafe fn find_substring_avx2(
        haystack: &[u8],
        needle: &[u8],
        case_sensitive: bool,
    ) -> Option<usize> {
        if needle.len() > haystack.len() {
            return None;
        }
        let last_valid_start = haystack.len() - needle.len();

        let first_lo = first_byte_lower(needle[0]);
        let first_hi = first_byte_upper(needle[0]);
        let needle_first_lo = _mm256_set1_epi8(first_lo as i8);
        let needle_first_hi = _mm256_set1_epi8(first_hi as i8);

        let mut block_start = 0usize;
        while block_start + 32 <= haystack.len() {
            let chunk = _mm256_loadu_si256(haystack.as_ptr().add(block_start) as *const __m256i);

            let eq_lo = _mm256_cmpeq_epi8(chunk, needle_first_lo);
            let mask = if case_sensitive {
                _mm256_movemask_epi8(eq_lo) as u32
            } else {
                let eq_hi = _mm256_cmpeq_epi8(chunk, needle_first_hi);
                (_mm256_movemask_epi8(eq_lo) | _mm256_movemask_epi8(eq_hi)) as u32
            };

            let mut bits = mask;
            while bits != 0 {
                let bit_index = bits.trailing_zeros() as usize;
                let candidate = block_start + bit_index;
                if candidate <= last_valid_start
                    && scalar_matches(haystack, candidate, needle, case_sensitive)
                {
                    return Some(candidate);
                }
                bits &= bits - 1;
            }

            block_start += 32;
        }

        // Tail shorter than one AVX2 block.
        for start in block_start..=last_valid_start {
            if scalar_matches(haystack, start, needle, case_sensitive) {
                return Some(start);
            }
        }

        None
    }

    fn scalar_matches(haystack: &[u8], start: usize, needle: &[u8], case_sensitive: bool) -> bool {
        let window = &haystack[start..start + needle.len()];
        if case_sensitive {
            window == needle
        } else {
            window
                .iter()
                .zip(needle)
                .all(|(&a, &b)| a.to_ascii_lowercase() == b.to_ascii_lowercase())
        }
    }

    fn first_byte_lower(b: u8) -> u8 {
        b.to_ascii_lowercase()
    }
    fn first_byte_upper(b: u8) -> u8 {
        b.to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_match_and_counts_preceding_nuls() {
        let haystack = b"abc\0defg\0hij\0";
        // needle "hij" starts after 2 NULs.
        let m = find_next_match(haystack, b"hij", true).unwrap();
        assert_eq!(m.nul_count_before, 2);
    }

    #[test]
    fn case_insensitive_matches_mixed_case() {
        let haystack = b"README.TXT\0";
        let m = find_next_match(haystack, b"readme", false).unwrap();
        assert_eq!(m.nul_count_before, 0);
    }

    #[test]
    fn case_sensitive_rejects_mismatched_case() {
        let haystack = b"README.TXT\0";
        assert!(find_next_match(haystack, b"readme", true).is_none());
    }

    #[test]
    fn no_match_returns_none() {
        let haystack = b"abc\0def\0";
        assert!(find_next_match(haystack, b"zzz", true).is_none());
    }

    #[test]
    fn empty_needle_never_matches() {
        let haystack = b"abc\0";
        assert!(find_next_match(haystack, b"", true).is_none());
    }

    #[test]
    fn match_spanning_long_buffer_exercises_simd_block() {
        let mut haystack = vec![b'x'; 100];
        haystack.extend_from_slice(b"needle");
        haystack.push(0);
        let m = find_next_match(&haystack, b"needle", true).unwrap();
        assert_eq!(m.nul_count_before, 0);
    }
}
