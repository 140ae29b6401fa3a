//! Normalização de identidades – a MESMA regra para nomes de usuário e nomes
//! de canal, para que a comparação "canal pertence ao membro" seja simétrica.
//!
//! Pipeline: remove UM ponto final, remove tudo fora de `[\w-]`, minúsculas,
//! NFC. A NFC entra por último: remover um caractere bloqueador pode juntar
//! uma base com um diacrítico e criar um par recém-componível.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w-]").expect("regex NON_WORD"));

/// Forma canônica de um nome de usuário (ou de canal) para comparação.
///
/// `\w` aqui é Unicode: letras acentuadas sobrevivem. "josé!!" vira "josé",
/// nunca "jose".
pub fn normalize_username(raw: &str) -> String {
    let trimmed = raw.strip_suffix('.').unwrap_or(raw);
    let kept = NON_WORD.replace_all(trimmed, "");
    kept.to_lowercase().nfc().collect()
}

/// Duas identidades casam se as formas normalizadas coincidem ou se as cruas
/// são idênticas. Formas normalizadas vazias não casam entre si: um nome só
/// de pontuação não pode reivindicar o canal de outro.
pub fn matches(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let na = normalize_username(a);
    !na.is_empty() && na == normalize_username(b)
}

/// Nome de canal derivado de um nome de usuário. O Discord rejeita `.` no fim
/// e caracteres fora do conjunto word; a forma normalizada já atende aos dois.
pub fn channel_name_for(username: &str) -> String {
    normalize_username(username)
}
