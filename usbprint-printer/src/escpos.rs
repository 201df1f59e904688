//! ESC/POS command builder
//!
//! Covers the commands the USB printer driver issues: text lines, cuts,
//! cash drawer kick and buzzer.

use crate::encoding::encode_text;

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;

/// Line terminator sent after printed text
pub const CRLF: [u8; 2] = [0x0D, 0x0A];

/// Cut style for `GS V m`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutMode {
    Full,
    Partial,
}

/// ESC/POS command builder
#[derive(Debug, Default, Clone)]
pub struct EscPosBuilder {
    buf: Vec<u8>,
}

impl EscPosBuilder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
        }
    }

    // === Text Output ===

    /// Write text encoded in `charset`
    pub fn text(&mut self, s: &str, charset: &str) -> &mut Self {
        self.buf.extend_from_slice(&encode_text(s, charset));
        self
    }

    /// Write text followed by CR LF
    pub fn line(&mut self, s: &str, charset: &str) -> &mut Self {
        self.text(s, charset).line_end()
    }

    pub fn line_end(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&CRLF);
        self
    }

    // === Paper Control ===

    /// Feed `lines` then full cut (GS V 66 n)
    pub fn cut_feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&[GS, 0x56, 0x42, lines]);
        self
    }

    /// Cut without feeding (GS V 48 / GS V 49)
    pub fn cut(&mut self, mode: CutMode) -> &mut Self {
        let m = match mode {
            CutMode::Full => 0x30,
            CutMode::Partial => 0x31,
        };
        self.buf.extend_from_slice(&[GS, 0x56, m]);
        self
    }

    // === Cash Drawer ===

    /// Kick the cash drawer on pin 2 (ESC p 0 64 80)
    pub fn open_cash_box(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, 0x70, 0x00, 64, 80]);
        self
    }

    // === Buzzer ===

    /// Beep `times` times, each `duration` x 50ms (ESC B n t)
    pub fn buzzer(&mut self, times: u8, duration: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, 0x42, times, duration]);
        self
    }

    /// Four short beeps
    pub fn default_buzzer(&mut self) -> &mut Self {
        self.buzzer(4, 1)
    }

    /// Configure the buzzer (ESC C n t m)
    pub fn buzzer_mode(&mut self, times: u8, duration: u8, mode: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, 0x43, times, duration, mode]);
        self
    }

    // === Raw ===

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}
