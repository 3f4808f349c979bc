mod features;
mod loader;
mod pairs;
mod record;
mod similarity;
pub mod text;
mod tokenizer;
mod vectorizer;

pub use features::{FeatureExtractor, NliFeatures};
pub use loader::{
    BatchInputs, DataLoader, ExampleLoader, NliBatch, NliBatchData, NliExample, NliInputs,
    PaddedSequences, TokenizedPair,
};
pub use pairs::{
    get_claim_evidence_pairs, load_pair_cache, pair_cache_path, save_pair_cache, truncate_words,
    ClaimEvidencePair, Evidence, EvidenceMode,
};
pub use record::{load_fever, load_nli, ClaimRecord, FeverChunks, Label, FEVER_EVIDENCE_SEPARATOR};
pub use similarity::{cosine_similarity, paired_cosine};
pub use tokenizer::{Tokenizer, WordTokenizer, PAD_TOKEN, UNK_TOKEN};
pub use vectorizer::{CountVectorizer, SparseVector, TfidfVectorizer, Vocabulary};
