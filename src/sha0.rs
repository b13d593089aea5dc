//! SHA-0: the withdrawn predecessor of SHA-1, needed only to reproduce the
//! legacy password derivation (`secure_password = SHA0(SHA0(password ||
//! UPPER(username)) || random20)`).
//!
//! SHA-0 is identical to SHA-1 except the message schedule omits the
//! 1-bit left rotate: `w[t] = w[t-3] ^ w[t-8] ^ w[t-14] ^ w[t-16]` (SHA-1
//! additionally rotates that value left by 1). No maintained crate exposes
//! this withdrawn variant, so it is hand-rolled here the same way the
//! session engine hand-rolls other small, fixed wire-format algorithms
//! (the Pack codec, the BOOTP layout).

const H0: [u32; 5] = [0x67452301, 0xEFCDAB89, 0x98BADCFE, 0x10325476, 0xC3D2E1F0];

/// Compute the 20-byte SHA-0 digest of `data`.
pub fn sha0(data: &[u8]) -> [u8; 20] {
    let mut h = H0;

    let mut message = data.to_vec();
    let bit_len = (data.len() as u64) * 8;
    message.push(0x80);
    while message.len() % 64 != 56 {
        message.push(0);
    }
    message.extend_from_slice(&bit_len.to_be_bytes());

    for chunk in message.chunks_exact(64) {
        let mut w = [0u32; 80];
        for i in 0..16 {
            w[i] = u32::from_be_bytes([
                chunk[i * 4],
                chunk[i * 4 + 1],
                chunk[i * 4 + 2],
                chunk[i * 4 + 3],
            ]);
        }
        for t in 16..80 {
            // SHA-0: no left-rotate here (the one and only difference from SHA-1).
            w[t] = w[t - 3] ^ w[t - 8] ^ w[t - 14] ^ w[t - 16];
        }

        let (mut a, mut b, mut c, mut d, mut e) = (h[0], h[1], h[2], h[3], h[4]);

        for (t, &wt) in w.iter().enumerate() {
            let (f, k) = match t {
                0..=19 => ((b & c) | ((!b) & d), 0x5A827999u32),
                20..=39 => (b ^ c ^ d, 0x6ED9EBA1u32),
                40..=59 => ((b & c) | (b & d) | (c & d), 0x8F1BBCDCu32),
                _ => (b ^ c ^ d, 0xCA62C1D6u32),
            };

            let temp = a
                .rotate_left(5)
                .wrapping_add(f)
                .wrapping_add(e)
                .wrapping_add(k)
                .wrapping_add(wt);
            e = d;
            d = c;
            c = b.rotate_left(30);
            b = a;
            a = temp;
        }

        h[0] = h[0].wrapping_add(a);
        h[1] = h[1].wrapping_add(b);
        h[2] = h[2].wrapping_add(c);
        h[3] = h[3].wrapping_add(d);
        h[4] = h[4].wrapping_add(e);
    }

    let mut out = [0u8; 20];
    for (i, word) in h.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// Compute the legacy SoftEther `secure_password`:
/// `SHA0(SHA0(password || UPPER(username)) || random20)`.
pub fn secure_password(password: &[u8], username: &str, random20: &[u8; 20]) -> [u8; 20] {
    let mut inner_input = Vec::with_capacity(password.len() + username.len());
    inner_input.extend_from_slice(password);
    inner_input.extend_from_slice(username.to_uppercase().as_bytes());
    let inner = sha0(&inner_input);

    let mut outer_input = Vec::with_capacity(40);
    outer_input.extend_from_slice(&inner);
    outer_input.extend_from_slice(random20);
    sha0(&outer_input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha0_empty_string() {
        // Known SHA-0 test vector for the empty string.
        let digest = sha0(b"");
        assert_eq!(
            hex_string(&digest),
            "f96cea198ad1dd5617ac084a3d92c6107708c0ef"
        );
    }

    #[test]
    fn sha0_abc() {
        let digest = sha0(b"abc");
        assert_eq!(
            hex_string(&digest),
            "0164b8a914cd2a5e74c4f7ff082c4d97f1edf880"
        );
    }

    #[test]
    fn secure_password_is_deterministic_and_differs_from_sha1() {
        let random20 = [0u8; 20];
        let a = secure_password(b"p@ss", "alice", &random20);
        let b = secure_password(b"p@ss", "alice", &random20);
        assert_eq!(a, b);

        // username case must not matter (we upper-case it ourselves).
        let c = secure_password(b"p@ss", "ALICE", &random20);
        assert_eq!(a, c);
    }

    fn hex_string(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}
