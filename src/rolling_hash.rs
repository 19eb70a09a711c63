/// Adler32-style rolling checksum used by the block matcher.
///
/// Two running sums combined into a 32-bit digest, with O(1) window slides:
/// drop the oldest byte, admit the next one.
const MOD_ADLER: u32 = 65521;

pub struct RollingChecksum {
    a: u32,
    b: u32,
    window: u32,
}

impl RollingChecksum {
    /// Checksum an initial window of data.
    pub fn from_block(data: &[u8]) -> Self {
        // Accumulate in u64 so the modular reduction happens once at the end
        // instead of per byte.
        let (a, b) = data.iter().fold((1u64, 0u64), |(a, b), &byte| {
            let a = a + byte as u64;
            (a, b + a)
        });
        Self {
            a: (a % MOD_ADLER as u64) as u32,
            b: (b % MOD_ADLER as u64) as u32,
            window: data.len() as u32,
        }
    }

    /// Slide the window one byte: remove `out_byte` from the front, append
    /// `in_byte` at the back.
    pub fn slide(&mut self, out_byte: u8, in_byte: u8) {
        let out = out_byte as u32;
        let inb = in_byte as u32;

        self.a = (self.a + MOD_ADLER - out + inb) % MOD_ADLER;
        self.b = (self.b + MOD_ADLER - 1 + self.a - (out * self.window) % MOD_ADLER) % MOD_ADLER;
    }

    pub fn digest(&self) -> u32 {
        (self.b << 16) | self.a
    }
}
