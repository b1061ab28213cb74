//! Arcfour (RC4) stream cipher.
//!
//! Used by the standard security handler for revisions 2 to 4 and for the
//! per-object string and stream keys of the `V2` crypt filter method.

/// RC4 stream cipher state.
pub struct Arcfour {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Arcfour {
    /// Create a cipher from a key of 1 to 256 bytes.
    ///
    /// Returns `None` for an empty or oversized key.
    pub fn new(key: &[u8]) -> Option<Self> {
        if key.is_empty() || key.len() > 256 {
            return None;
        }

        let mut state: [u8; 256] = std::array::from_fn(|i| i as u8);

        // Key-scheduling algorithm (KSA)
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }

        Some(Self { state, i: 0, j: 0 })
    }

    /// One-shot encryption/decryption (RC4 is symmetric).
    ///
    /// An empty key leaves the data untouched.
    pub fn crypt(key: &[u8], data: &[u8]) -> Vec<u8> {
        match Self::new(key) {
            Some(mut cipher) => cipher.process(data),
            None => data.to_vec(),
        }
    }

    /// Encrypt/decrypt data, advancing the keystream.
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply_keystream(&mut out);
        out
    }

    /// XOR the keystream into `buf` in place.
    pub fn apply_keystream(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte ^= self.prga();
        }
    }

    /// Pseudo-random generation algorithm (PRGA).
    fn prga(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.state[self.i as usize]);
        self.state.swap(self.i as usize, self.j as usize);

        let idx = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
        self.state[idx as usize]
    }
}
