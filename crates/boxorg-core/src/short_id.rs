//! Generación de `short_id` para etiquetas QR.
use uuid::Uuid;

/// Alfabeto sin caracteres ambiguos al leer una etiqueta (0/O, 1/I).
pub const SHORT_ID_ALPHABET: &[u8; 32] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
pub const DEFAULT_SHORT_ID_LEN: usize = 8;

/// Token aleatorio de `len` caracteres tomados de `SHORT_ID_ALPHABET`.
///
/// La entropía sale de UUID v4; el byte 6 lleva el nibble de versión fijo y
/// se descarta.
pub fn generate_short_id(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        let uuid = Uuid::new_v4();
        for (idx, byte) in uuid.as_bytes().iter().enumerate() {
            if idx == 6 {
                continue;
            }
            if out.len() == len {
                break;
            }
            out.push(SHORT_ID_ALPHABET[(byte & 0x1f) as usize] as char);
        }
    }
    out
}

pub fn is_valid_short_id(candidate: &str) -> bool {
    !candidate.is_empty() && candidate.bytes().all(|b| SHORT_ID_ALPHABET.contains(&b))
}
