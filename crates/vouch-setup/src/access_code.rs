use rand::Rng;

/// Generates a one-time access code, uniformly random in `[100000, 999999]`.
pub fn generate_access_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999u32).to_string()
}
