//! Prompt construction for evaluation, generation and concept brainstorming.
//!
//! Every prompt asks for a strict JSON answer; the matching parsers live in
//! `llm::response`.

use crate::domain::{Grid, Pair};

pub const EVALUATION_SYSTEM_PROMPT: &str = "You are an expert at solving ARC (Abstraction and Reasoning Corpus) \
puzzles. Each puzzle is a set of input/output grid examples that share one hidden transformation rule. \
Answer with a single JSON object and nothing else.";

pub const GENERATION_SYSTEM_PROMPT: &str = "You are an ARC puzzle creator. Given a concept, design a challenge \
with 5 input/output pairs that all follow the same rule. Output strictly JSON of the form \
{\"pairs\": [{\"input\": [[...]], \"output\": [[...]]}], \"explanation\": \"...\"}. Use exactly 5 pairs, \
colors 0-9, grids at most 30x30.";

pub const CONCEPT_SYSTEM_PROMPT: &str = "You are an inventive puzzle designer who turns stories, games, nature \
and everyday life into grid puzzles. Each puzzle is a rule that transforms a small colored grid (at most 30x30, \
colors 0-9) from input to output. Concepts should be vivid and concrete, not dry mathematical descriptions. \
Output ONLY a JSON object: {\"concepts\": [\"...\", \"...\"]}";

/// Inspiration themes, rotated per brainstorm batch.
pub const INSPIRATION_THEMES: [&str; 12] = [
    "Detective stories: clues at a crime scene, mirrored fingerprints, a trail of evidence to follow in order.",
    "Fairy tales and myth: a mirror that hides one color, scales growing in a spiral, a shifting labyrinth.",
    "Nature: crystals growing outward from a seed, rivers following the terrain, branching trees.",
    "Architecture: blueprints with hidden rooms, stained glass motifs at several scales, reflections in a lake.",
    "Music: a rhythm that shifts each cycle, an inverted melody, a round where a pattern repeats offset.",
    "Games: pieces that paint the squares they cross, falling blocks that stack, dominoes that must match.",
    "Cooking and chemistry: mixing two colors into a third, layered recipes, cells that ferment from neighbors.",
    "Weather and sky: constellations joining same-colored dots, light spreading from an edge, six-fold snowflakes.",
    "Maps: coloring regions so neighbors differ, rivers merging downhill, treasure at crossing paths.",
    "Machines: a sorter that groups items by color, an elevator collecting passengers floor by floor.",
    "Optical illusions: figure and ground swapping, fractal self-similarity, projections that only fit one view.",
    "Storytelling: comic panels that transform the previous one, a time-lapse of a changing scene.",
];

/// How many earlier concepts the brainstorm prompt lists for exclusion.
pub const MAX_EXCLUSIONS: usize = 200;

/// Render a grid as compact JSON rows, one row per line.
pub fn render_grid(grid: &Grid) -> String {
    let rows: Vec<String> = grid
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
            format!("[{}]", cells.join(","))
        })
        .collect();
    format!("[\n  {}\n]", rows.join(",\n  "))
}

/// User prompt for solving a puzzle from its training pairs.
pub fn evaluation_prompt(training: &[&Pair], tests: &[&Pair]) -> String {
    let mut prompt = String::from(
        "Each grid is a 2D array of integers 0-9, one per color \
(0 black, 1 blue, 2 red, 3 green, 4 yellow, 5 gray, 6 pink, 7 orange, 8 cyan, 9 brown).\n\n\
Study the training examples, find the rule that turns each input into its output, then apply it to the test inputs.\n\n\
## Training Examples\n\n",
    );

    for (i, pair) in training.iter().enumerate() {
        prompt.push_str(&format!(
            "### Example {}\nInput:\n{}\n\nOutput:\n{}\n\n",
            i + 1,
            render_grid(&pair.input),
            render_grid(&pair.output)
        ));
    }

    prompt.push_str("## Test Cases\n\n");
    for (i, pair) in tests.iter().enumerate() {
        prompt.push_str(&format!("### Test {}\nInput:\n{}\n\n", i + 1, render_grid(&pair.input)));
    }

    prompt.push_str(&format!(
        "Respond with a JSON object:\n\
{{\n  \"reasoning\": \"how you found and applied the rule\",\n  \"predictions\": [[[...output grid for test 1...]], ...]\n}}\n\n\
The predictions array must contain exactly {} grid(s), in test order.",
        tests.len()
    ));
    prompt
}

/// User prompt for turning a concept into a puzzle.
pub fn generation_prompt(concept: &str) -> String {
    format!("Concept: {}", concept)
}

/// User prompt for one brainstorm batch.
///
/// `batch` selects the inspiration theme. Only the last
/// [`MAX_EXCLUSIONS`] entries of `exclude` are listed.
pub fn concept_prompt(count: usize, batch: usize, exclude: &[String]) -> String {
    let theme = INSPIRATION_THEMES[batch % INSPIRATION_THEMES.len()];
    let mut prompt = format!(
        "Invent {} original ARC puzzle concepts. Each concept should:\n\
- be 1-3 sentences that paint a picture or tell a tiny story\n\
- describe a specific grid transformation that could actually be implemented\n\n\
INSPIRATION FOR THIS BATCH:\n{}\n\n\
Example of the style wanted:\n\
- \"Seeds (non-black cells) are planted in black soil. Each seed grows outward in a diamond, one layer per step, \
until it touches another flower.\"",
        count, theme
    );

    if !exclude.is_empty() {
        let skip = exclude.len().saturating_sub(MAX_EXCLUSIONS);
        prompt.push_str("\n\nDO NOT repeat or closely resemble any of these existing concepts:\n");
        for concept in &exclude[skip..] {
            prompt.push_str(&format!("- {}\n", concept));
        }
    }

    prompt.push_str("\nOutput ONLY valid JSON: {\"concepts\": [...]}.");
    prompt
}
