/// Divide una línea cruda en argumentos (argv).
///
/// - Separa por espacios en blanco (espacio, tab, salto de línea).
/// - Lo que va entre comillas dobles forma parte de un único token y las
///   comillas se eliminan: `echo "hola mundo"` → `["echo", "hola mundo"]`.
/// - Las comillas pueden aparecer en medio de un token: `a"b c"d` → `["ab cd"]`.
/// - `""` produce un token vacío.
/// - Una comilla sin cerrar se extiende hasta el final de la línea.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    tokens
}
