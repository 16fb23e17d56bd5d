//! Test fixtures - source snippets and digest sets

/// Small modules used as file contents
pub fn simple_module() -> &'static str {
    "export const answer = 42;"
}

pub fn function_module() -> &'static str {
    r#"export function add(a: number, b: number): number {
    return a + b;
}"#
}

pub fn class_module() -> &'static str {
    r#"export class Point {
    constructor(public x: number, public y: number) {}

    distance(): number {
        return Math.sqrt(this.x * this.x + this.y * this.y);
    }
}"#
}

pub fn importing_module() -> &'static str {
    r#"import {add} from './function_module';
import {Point} from './class_module';

export const origin = new Point(add(0, 0), 0);"#
}

/// Build a digest set from `(path, digest)` pairs
pub fn digests(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(path, digest)| (path.to_string(), digest.to_string()))
        .collect()
}

/// `count` generated paths sharing one digest, e.g. `/src/f0.ts`
pub fn generated_digests(count: usize, digest: &str) -> Vec<(String, String)> {
    (0..count)
        .map(|i| (format!("/src/f{}.ts", i), digest.to_string()))
        .collect()
}
