use quarry_memory::document::Document;

pub const DEMO_QUESTIONS: [&str; 4] = [
    "What is artificial intelligence?",
    "Tell me about Python programming language",
    "What are vector databases used for?",
    "How does machine learning work?",
];

const AI_OVERVIEW: &str = "\
Artificial Intelligence (AI) is a broad field of computer science focused on creating systems \
capable of performing tasks that typically require human intelligence. These tasks include \
learning, reasoning, problem-solving, perception, and language understanding.

Machine Learning is a subset of AI that focuses on algorithms that can learn from and make \
predictions or decisions based on data. Instead of being explicitly programmed for every task, \
these systems improve their performance through experience.

Deep Learning is a subset of machine learning that uses neural networks with multiple layers \
to model and understand complex patterns in data. It has been particularly successful in areas \
like image recognition, natural language processing, and speech recognition.";

const PYTHON_OVERVIEW: &str = "\
Python is a high-level, interpreted programming language known for its simplicity and readability. \
Created by Guido van Rossum and first released in 1991, Python has become one of the most popular \
programming languages in the world.

Python's design philosophy emphasizes code readability and a syntax that allows programmers to \
express concepts in fewer lines of code. This makes it an excellent choice for beginners and \
experienced developers alike.

Python is widely used in various domains including web development, data science, artificial \
intelligence, scientific computing, automation, and more. Its extensive library ecosystem and \
active community make it a versatile tool for many applications.";

const VECTOR_DB_OVERVIEW: &str = "\
Vector databases are specialized databases designed to store, index, and query high-dimensional \
vector data efficiently. They are essential components in modern AI applications, particularly \
those involving machine learning and semantic search.

Traditional databases store structured data in rows and columns, but vector databases store \
mathematical representations of data as vectors in high-dimensional space. This allows for \
similarity searches based on semantic meaning rather than exact matches.

Quarry stores embeddings in a SQLite file by default, or in a Qdrant collection, and performs \
cosine similarity search over them, which makes it a small retrieval-augmented generation (RAG) \
system.";

/// The built-in demo corpus, one document per topic.
#[must_use]
pub fn sample_documents() -> Vec<Document> {
    [
        ("ai_overview", AI_OVERVIEW),
        ("python_overview", PYTHON_OVERVIEW),
        ("vector_db_overview", VECTOR_DB_OVERVIEW),
    ]
    .into_iter()
    .map(|(id, text)| {
        Document::new(text)
            .with_id(id)
            .with_metadata("source", id)
            .with_metadata("type", "sample")
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_are_valid_and_distinct() {
        let docs = sample_documents();
        assert_eq!(docs.len(), 3);
        for doc in &docs {
            doc.validate().unwrap();
            assert!(!doc.text.trim().is_empty());
        }
        let ids: Vec<_> = docs.iter().map(Document::resolved_id).collect();
        assert_eq!(ids, ["ai_overview", "python_overview", "vector_db_overview"]);
    }
}
