//! Codificación de la jerarquía de ubicaciones como "materialized path".
//!
//! Cada ubicación guarda un `path` ASCII con segmentos separados por `.`,
//! siempre comenzando por el segmento fijo `root` (p.ej.
//! `root.garaz.polka_a`). El almacén de filas no expone operadores de árbol,
//! así que todo el razonamiento jerárquico se reduce a igualdad y prefijos de
//! strings evaluados en memoria.
//!
//! Todas las funciones son puras y totales: nunca fallan.

/// Segmento raíz implícito de todos los paths.
pub const ROOT_SEGMENT: &str = "root";
/// Separador de segmentos.
pub const PATH_SEPARATOR: char = '.';
/// Número máximo de segmentos (incluyendo `root`).
pub const MAX_DEPTH: usize = 5;

/// Transliteración fija del alfabeto polaco a ASCII. Cualquier otro carácter
/// no ASCII termina como `_` en `normalize_name`.
fn transliterate(c: char) -> Option<char> {
    let mapped = match c {
        'ą' | 'Ą' => 'a',
        'ć' | 'Ć' => 'c',
        'ę' | 'Ę' => 'e',
        'ł' | 'Ł' => 'l',
        'ń' | 'Ń' => 'n',
        'ó' | 'Ó' => 'o',
        'ś' | 'Ś' => 's',
        'ź' | 'Ź' | 'ż' | 'Ż' => 'z',
        _ => return None,
    };
    Some(mapped)
}

/// Normaliza un nombre escrito por el usuario a un slug `[a-z0-9_]`.
///
/// Translitera, pasa a minúsculas, reemplaza lo demás por `_`, colapsa
/// repeticiones de `_` y recorta los `_` de los extremos. Es idempotente.
pub fn normalize_name(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = transliterate(c).unwrap_or(c).to_ascii_lowercase();
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' };
        if c == '_' && (slug.is_empty() || slug.ends_with('_')) {
            continue;
        }
        slug.push(c);
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

/// `root.<slug>` si no hay padre, si no `<parent>.<slug>`.
pub fn build_path(parent_path: Option<&str>, slug: &str) -> String {
    let parent = parent_path.unwrap_or(ROOT_SEGMENT);
    let mut path = String::with_capacity(parent.len() + 1 + slug.len());
    path.push_str(parent);
    path.push(PATH_SEPARATOR);
    path.push_str(slug);
    path
}

/// Todo menos el último segmento, o `""` si el path tiene un solo segmento.
pub fn get_parent_path(path: &str) -> &str {
    match path.rfind(PATH_SEPARATOR) {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Último segmento del path (el slug propio de la ubicación).
pub fn last_segment(path: &str) -> &str {
    match path.rfind(PATH_SEPARATOR) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// `true` si `candidate` comienza con `ancestor + "."`.
pub fn is_descendant_path(candidate: &str, ancestor: &str) -> bool {
    candidate.strip_prefix(ancestor)
             .is_some_and(|rest| rest.starts_with(PATH_SEPARATOR))
}

/// `true` si `candidate` es `parent + "." + <exactamente un segmento>`.
pub fn is_direct_child_path(candidate: &str, parent: &str) -> bool {
    candidate.strip_prefix(parent)
             .and_then(|rest| rest.strip_prefix(PATH_SEPARATOR))
             .is_some_and(|segment| !segment.is_empty() && !segment.contains(PATH_SEPARATOR))
}

/// Cantidad de segmentos. `""` tiene profundidad 0, `root.a` profundidad 2.
pub fn path_depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split(PATH_SEPARATOR).count()
    }
}

/// Verifica el formato persistido: sólo `[a-z0-9_.]`, empieza por `root`,
/// sin segmentos vacíos y como mucho `MAX_DEPTH` segmentos.
pub fn is_valid_path(path: &str) -> bool {
    let mut segments = path.split(PATH_SEPARATOR);
    if segments.next() != Some(ROOT_SEGMENT) {
        return false;
    }
    let mut depth = 1;
    for segment in segments {
        depth += 1;
        if segment.is_empty()
           || !segment.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return false;
        }
    }
    depth <= MAX_DEPTH
}
