mod descriptor;
mod scorer;

pub use descriptor::{classify, is_not_applicable, Bucket, DescriptorTable, EmotionRow, TableError};
pub use scorer::{
    contribution, final_score, Contribution, EmotionScorer, ScoreMatrix, ScoreRow,
    NEUTRAL_CONTRIBUTION, SCORE_SCALE,
};
