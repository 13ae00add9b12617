/// RC4 keystream generator. Encryption and decryption are the same operation.
#[derive(Clone)]
pub struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    /// Run the key schedule. An empty key leaves the identity permutation.
    pub fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (idx, slot) in s.iter_mut().enumerate() {
            *slot = idx as u8;
        }

        if !key.is_empty() {
            let mut j = 0u8;
            for idx in 0..256 {
                j = j
                    .wrapping_add(s[idx])
                    .wrapping_add(key[idx % key.len()]);
                s.swap(idx, j as usize);
            }
        }

        Self { s, i: 0, j: 0 }
    }

    /// XOR the next `data.len()` keystream bytes into `data`.
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.s[self.i as usize]);
            self.s.swap(self.i as usize, self.j as usize);
            let k = self.s[self.s[self.i as usize].wrapping_add(self.s[self.j as usize]) as usize];
            *byte ^= k;
        }
    }
}

/// One-shot RC4 over `data` with a fresh key schedule. An empty key leaves `data` unchanged.
pub fn apply(key: &[u8], data: &mut [u8]) {
    if key.is_empty() {
        return;
    }
    Rc4::new(key).apply_keystream(data);
}
